use std::future::Future;

use futures::{stream::FuturesUnordered, FutureExt, StreamExt};

use crate::{errors::ResolveError, types::Value};

/// Drives all branches concurrently, yielding their values in branch order
///
/// On the first failure, any other branch which already failed is collected,
/// the remaining branches are dropped, which cancels them.
pub(crate) async fn join_all<F>(branches: impl IntoIterator<Item = F>) -> Result<Vec<Value>, ResolveError>
where
    F: Future<Output = Result<Value, ResolveError>>,
{
    let mut pending: FuturesUnordered<_> = branches
        .into_iter()
        .enumerate()
        .map(|(index, branch)| branch.map(move |result| (index, result)))
        .collect();

    let mut values: Vec<Option<Value>> = vec![None; pending.len()];

    while let Some((index, result)) = pending.next().await {
        match result {
            Ok(value) => values[index] = Some(value),
            Err(error) => {
                let mut errors = vec![error];
                while let Some(Some((_, result))) = pending.next().now_or_never() {
                    if let Err(error) = result {
                        errors.push(error);
                    }
                }

                if !pending.is_empty() {
                    tracing::debug!("Cancelling {} pending branches", pending.len());
                }
                return Err(ResolveError::group(errors));
            }
        }
    }

    Ok(values.into_iter().flatten().collect())
}
