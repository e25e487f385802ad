use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Failed to setup environment: {}", what))]
    EnvSetup { what: String },
}

pub type Result<T> = std::result::Result<T, Error>;
