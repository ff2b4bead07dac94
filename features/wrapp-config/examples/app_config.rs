use std::{convert::Infallible, sync::Arc};

use wrapp_compose::{BindingRegistry, Provider, Resolver};
use wrapp_config::{config::Config, provider::ConfigProvider};

#[derive(Clone)]
struct AppConfig {
    host: String,
    port: u16,
    app_name: String,
}

fn main() {
    let app_config = AppConfig {
        host: "localhost".to_string(),
        port: 8080_u16,
        app_name: "My Awesome App".to_string(),
    };

    let mut config_provider = ConfigProvider::new();
    if let Err(e) = config_provider.add_config("app", app_config) {
        eprintln!("{e}");
        return;
    }

    let registry = config_provider.into_registry().merge(&BindingRegistry::new().add_provider(
        "banner",
        Provider::new(["app"], |app: Arc<AppConfig>| async move {
            Ok::<_, Infallible>(format!("{} on {}:{}", app.app_name, app.host, app.port))
        }),
    ));

    let resolver = Resolver::new(registry).to_blocking();
    match resolver.get::<String>("banner") {
        Ok(banner) => println!("{banner}"),
        Err(e) => eprintln!("{e}"),
    }

    let port = resolver.get::<u16>(Config::<AppConfig>::expr("app").map(|app| app.port));
    println!("{:?}", port);
}
