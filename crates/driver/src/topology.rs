//! Deployment topology discovery

use doccontrol_core::error::{Error, Result};
use doccontrol_core::executor::{with_cancellation, CommandExecutor};
use doccontrol_core::server::{CommandTarget, ReadPreference, ServerInstanceHandle};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Shape of the deployment as reported by `isMaster`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topology {
    Standalone,
    ReplicaSet {
        set_name: String,
        primary: Option<ServerInstanceHandle>,
        hosts: Vec<ServerInstanceHandle>,
    },
}

impl Topology {
    /// Interpret an `isMaster` reply
    pub fn from_is_master(reply: &Value) -> Result<Self> {
        let Some(set_name) = reply.get("setName").and_then(Value::as_str) else {
            return Ok(Self::Standalone);
        };

        let hosts = reply
            .get("hosts")
            .and_then(Value::as_array)
            .map(|hosts| {
                hosts
                    .iter()
                    .map(|host| {
                        host.as_str()
                            .ok_or_else(|| Error::serialization("isMaster host is not a string"))?
                            .parse()
                    })
                    .collect::<Result<Vec<ServerInstanceHandle>>>()
            })
            .transpose()?
            .unwrap_or_default();

        let primary = reply
            .get("primary")
            .and_then(Value::as_str)
            .map(str::parse::<ServerInstanceHandle>)
            .transpose()?;

        Ok(Self::ReplicaSet {
            set_name: set_name.to_string(),
            primary,
            hosts,
        })
    }

    pub fn is_replica_set(&self) -> bool {
        matches!(self, Self::ReplicaSet { .. })
    }

    pub fn set_name(&self) -> Option<&str> {
        match self {
            Self::ReplicaSet { set_name, .. } => Some(set_name),
            Self::Standalone => None,
        }
    }

    pub fn primary(&self) -> Option<&ServerInstanceHandle> {
        match self {
            Self::ReplicaSet { primary, .. } => primary.as_ref(),
            Self::Standalone => None,
        }
    }

    /// Members other than the primary, in the order the server listed them
    pub fn secondaries(&self) -> Vec<ServerInstanceHandle> {
        match self {
            Self::ReplicaSet { primary, hosts, .. } => hosts
                .iter()
                .filter(|host| Some(*host) != primary.as_ref())
                .cloned()
                .collect(),
            Self::Standalone => Vec::new(),
        }
    }

    pub fn is_secondary(&self, instance: &ServerInstanceHandle) -> bool {
        self.secondaries().contains(instance)
    }
}

impl std::fmt::Display for Topology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standalone => write!(f, "standalone"),
            Self::ReplicaSet {
                set_name, primary, ..
            } => {
                write!(f, "replica set '{set_name}'")?;
                if let Some(primary) = primary {
                    write!(f, " (primary {primary})")?;
                }
                Ok(())
            }
        }
    }
}

/// One-shot `isMaster` probe
pub struct TopologyProbe;

impl TopologyProbe {
    pub async fn probe(
        executor: &dyn CommandExecutor,
        cancel: &CancellationToken,
    ) -> Result<Topology> {
        debug!("Probing deployment topology");
        let reply = with_cancellation(
            cancel,
            executor.execute(
                "admin",
                json!({ "isMaster": 1 }),
                &CommandTarget::ReadPreference(ReadPreference::PrimaryPreferred),
                cancel,
            ),
        )
        .await?;

        let topology = Topology::from_is_master(&reply)?;
        info!("Connected to {}", topology);
        Ok(topology)
    }
}
