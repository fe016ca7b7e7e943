use std::fmt;
use std::future::Future;

use futures_util::future::join_all;

use crate::store::StoreError;

/// Failures collected from one fan-out. Successful siblings stay applied.
#[derive(Debug)]
pub struct TaskErrors {
    pub total: usize,
    pub errors: Vec<StoreError>,
}

impl fmt::Display for TaskErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {} tasks failed", self.errors.len(), self.total)?;
        for (i, e) in self.errors.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{e}")?;
        }
        Ok(())
    }
}

impl std::error::Error for TaskErrors {}

/// Run every task concurrently and wait for all of them. Nothing is
/// cancelled when a task fails; outputs of the successful tasks are
/// returned only when no task failed.
pub async fn run_all<I, F, T>(tasks: I) -> Result<Vec<T>, TaskErrors>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T, StoreError>>,
{
    let results = join_all(tasks).await;
    let total = results.len();
    let mut outputs = Vec::with_capacity(total);
    let mut errors = Vec::new();
    for res in results {
        match res {
            Ok(v) => outputs.push(v),
            Err(e) => errors.push(e),
        }
    }
    if errors.is_empty() {
        Ok(outputs)
    } else {
        Err(TaskErrors { total, errors })
    }
}
