#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    IO(#[from] std::io::Error),

    #[error(transparent)]
    Runner(#[from] spindle_io::Error),

    #[error(transparent)]
    Config(#[from] spindle_config::error::Error),
}

pub type Result<T> = core::result::Result<T, Error>;
