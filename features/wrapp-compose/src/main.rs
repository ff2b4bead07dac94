use std::{convert::Infallible, sync::Arc};

use wrapp_compose::{BindingRegistry, Descriptor, Expr, Provider, Resolver};

#[derive(Debug)]
struct Connection {
    url: String,
}

fn main() {
    let base = BindingRegistry::new()
        .add_value("host", "localhost".to_string())
        .add_value("port", 5432_u16)
        .add_value("backend", "postgres".to_string())
        .add_provider(
            "url",
            Provider::new(["host", "port"], |host: Arc<String>, port: Arc<u16>| async move {
                Ok::<_, Infallible>(format!("{host}:{port}"))
            }),
        )
        .add_provider(
            "postgres",
            Provider::new(["url"], |url: Arc<String>| async move {
                Ok::<_, Infallible>(Connection {
                    url: format!("postgres://{url}"),
                })
            })
            .with_teardown(|connection: Arc<Connection>| async move {
                println!("closing {}", connection.url);
                Ok::<_, Infallible>(())
            }),
        )
        .add_delegate(
            "connection",
            Descriptor::select("backend", |backend: &String| backend.clone()),
        );

    let overrides = BindingRegistry::new().add_value("port", 6543_u16);
    let resolver = Resolver::new(base.merge(&overrides)).to_blocking();

    let connection = resolver.get::<Connection>("connection").unwrap();
    println!("{:?}", connection);

    let next_port = Expr::<u16>::inject("port") + Expr::pure(1_u16);
    println!("{}", resolver.get::<u16>(next_port).unwrap());

    resolver.destruct().unwrap();
}
