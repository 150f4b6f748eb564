use executor::ExecutorError;
use model::ModelError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),
}
