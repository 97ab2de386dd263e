//! Inspect command: introspect a locator without registering it.

use serde::Serialize;

use crate::config::FinderConfig;
use crate::error::RegisterError;
use crate::introspect::{self, IntrospectedServer};
use crate::locator::{Locator, LocatorKind};
use crate::transport::{Connector, TransportConnector};

/// Report from an inspect operation
#[derive(Debug, Clone, Serialize)]
pub struct InspectReport {
    pub locator: String,
    pub kind: LocatorKind,
    pub server: IntrospectedServer,
}

pub struct InspectCommand {
    connector: Box<dyn Connector>,
}

impl InspectCommand {
    pub fn new(connector: Box<dyn Connector>) -> Self {
        Self { connector }
    }

    pub fn from_config(config: &FinderConfig) -> Self {
        Self::new(Box::new(TransportConnector::from_config(config)))
    }

    /// Connect, introspect and close. Authorization failures are returned
    /// as-is; there is no fallback here.
    pub async fn execute(&self, raw: &str) -> Result<InspectReport, RegisterError> {
        let locator = Locator::parse(raw)?;
        let mut session = self.connector.connect(&locator, None).await?;
        let result = introspect::introspect(&mut session).await;
        session.close().await;

        Ok(InspectReport {
            locator: locator.to_string(),
            kind: locator.kind(),
            server: result?,
        })
    }
}
