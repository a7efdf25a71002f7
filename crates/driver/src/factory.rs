use crate::mock::MockDeployment;
use doccontrol_core::{config::ConnectionConfig, CommandExecutor, Error};
use std::sync::Arc;
use tracing::debug;

/// Creates a command executor based on configuration.
///
/// Returns a trait object so the controllers work the same against a real
/// deployment or the in-memory mock.
///
/// # Arguments
/// * `config` - Connection configuration naming the provider and URI
///
/// # Errors
/// Returns an error if the provider is unknown, was not compiled in, or the
/// connection string cannot be parsed
///
/// # Example
/// ```ignore
/// let config = ConnectionConfig {
///     provider: "mock".to_string(),
///     uri: "mongodb://a:27017,b:27017/?replicaSet=rs0".to_string(),
///     ..Default::default()
/// };
///
/// let executor = create_command_executor(&config).await?;
/// ```
pub async fn create_command_executor(
    config: &ConnectionConfig,
) -> Result<Arc<dyn CommandExecutor>, Error> {
    debug!("Creating '{}' command executor", config.provider);
    match config.provider.as_str() {
        "mock" => Ok(Arc::new(MockDeployment::from_uri(&config.uri)) as Arc<dyn CommandExecutor>),
        "mongodb" => mongodb_executor(config).await,
        other => Err(Error::config(format!(
            "Unknown connection provider '{other}'"
        ))),
    }
}

#[cfg(feature = "mongodb")]
async fn mongodb_executor(config: &ConnectionConfig) -> Result<Arc<dyn CommandExecutor>, Error> {
    let executor = crate::mongo::MongoCommandExecutor::connect(config).await?;
    Ok(Arc::new(executor) as Arc<dyn CommandExecutor>)
}

#[cfg(not(feature = "mongodb"))]
async fn mongodb_executor(_config: &ConnectionConfig) -> Result<Arc<dyn CommandExecutor>, Error> {
    Err(Error::config(
        "The 'mongodb' provider requires doccontrol-driver to be built with the 'mongodb' feature",
    ))
}
