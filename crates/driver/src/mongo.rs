//! Executor backed by the official MongoDB driver
//!
//! Commands travel as extended JSON: requests are converted to BSON with
//! [`Bson::try_from`] and replies come back as relaxed extended JSON, so
//! integers stay plain JSON numbers.
//!
//! The driver has no public connection pinning, so a pin here means "select
//! exactly this address for every command". Acquiring one pings the member to
//! surface unreachability up front; the lease itself holds nothing.

use async_trait::async_trait;
use doccontrol_core::config::ConnectionConfig;
use doccontrol_core::error::{Error, Result};
use doccontrol_core::executor::{with_cancellation, CommandExecutor, PinLease};
use doccontrol_core::server::{CommandTarget, MemberRole, ReadPreference, ServerInstanceHandle};
use mongodb::bson::{doc, Bson, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{
    ClientOptions, ReadPreference as DriverReadPreference, SelectionCriteria, ServerAddress,
};
use mongodb::{Client, ServerInfo, ServerType};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// [`CommandExecutor`] over a `mongodb::Client`
#[derive(Clone)]
pub struct MongoCommandExecutor {
    client: Client,
}

impl MongoCommandExecutor {
    /// Parse the connection string and build a client; no I/O happens until the first command
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let mut options = ClientOptions::parse(&config.uri)
            .await
            .map_err(|e| Error::config(format!("Invalid connection uri: {e}")))?;
        options.app_name = Some("doccontrol".to_string());
        options.connect_timeout = Some(config.timeout());
        options.server_selection_timeout = Some(config.timeout());

        let client = Client::with_options(options).map_err(map_driver_error)?;
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

fn member_role(server_type: ServerType) -> MemberRole {
    match server_type {
        ServerType::Standalone | ServerType::Mongos | ServerType::LoadBalancer => {
            MemberRole::Standalone
        }
        ServerType::RsPrimary => MemberRole::Primary,
        ServerType::RsSecondary => MemberRole::Secondary,
        _ => MemberRole::Other,
    }
}

fn same_address(address: &ServerAddress, instance: &ServerInstanceHandle) -> bool {
    match address {
        ServerAddress::Tcp { host, port } => {
            host.eq_ignore_ascii_case(instance.host()) && port.unwrap_or(27017) == instance.port()
        }
        _ => false,
    }
}

fn selection_criteria(target: &CommandTarget) -> SelectionCriteria {
    match target {
        CommandTarget::Primary => SelectionCriteria::ReadPreference(DriverReadPreference::Primary),
        CommandTarget::ReadPreference(preference) => {
            let preference = *preference;
            SelectionCriteria::Predicate(Arc::new(move |info: &ServerInfo| {
                preference.accepts(member_role(info.server_type()))
            }))
        }
        CommandTarget::Instance {
            instance,
            read_preference,
        } => {
            let instance = instance.clone();
            let preference: ReadPreference = *read_preference;
            SelectionCriteria::Predicate(Arc::new(move |info: &ServerInfo| {
                same_address(info.address(), &instance)
                    && preference.accepts(member_role(info.server_type()))
            }))
        }
    }
}

fn to_document(command: Value) -> Result<Document> {
    match Bson::try_from(command) {
        Ok(Bson::Document(document)) => Ok(document),
        Ok(other) => Err(Error::invalid_argument(format!(
            "Command must be a document, got {other}"
        ))),
        Err(e) => Err(Error::serialization(format!(
            "Command is not valid extended JSON: {e}"
        ))),
    }
}

fn map_driver_error(err: mongodb::error::Error) -> Error {
    match err.kind.as_ref() {
        ErrorKind::Command(command) => Error::command(
            command.code,
            command.code_name.clone(),
            command.message.clone(),
        ),
        ErrorKind::Write(WriteFailure::WriteConcernError(wc)) => {
            Error::command(wc.code, wc.code_name.clone(), wc.message.clone())
        }
        ErrorKind::ServerSelection { message, .. } => Error::unreachable(message.clone()),
        ErrorKind::InvalidArgument { message, .. } => Error::invalid_argument(message.clone()),
        _ => Error::transport(err.to_string()),
    }
}

#[async_trait]
impl CommandExecutor for MongoCommandExecutor {
    async fn execute(
        &self,
        database: &str,
        command: Value,
        target: &CommandTarget,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let document = to_document(command)?;
        debug!("Sending command to {} on {}", target, database);

        let run = async {
            self.client
                .database(database)
                .run_command(document)
                .selection_criteria(selection_criteria(target))
                .await
                .map_err(map_driver_error)
        };
        let reply = with_cancellation(cancel, run).await?;
        Ok(Bson::Document(reply).into_relaxed_extjson())
    }

    async fn acquire_pin(&self, instance: &ServerInstanceHandle) -> Result<PinLease> {
        let target = CommandTarget::Instance {
            instance: instance.clone(),
            read_preference: ReadPreference::Nearest,
        };
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .selection_criteria(selection_criteria(&target))
            .await
            .map_err(map_driver_error)?;
        Ok(PinLease::detached())
    }
}
