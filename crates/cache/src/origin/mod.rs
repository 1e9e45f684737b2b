//! Provenance records stored alongside cached outputs
//!
//! When an output is stored, a small record describing which build produced
//! it, how long it took, and where it ran is written next to it. On reuse the
//! record is read back so the caller can report the time saved.

mod properties;

pub use properties::OriginProperties;

use properties::io_error;

use cachetier_core::{Error, Result};
use cachetier_utils::identity;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;

const BUILD_INVOCATION_ID_KEY: &str = "buildInvocationId";
const TYPE_KEY: &str = "type";
const IDENTITY_KEY: &str = "identity";
const CREATION_TIME_KEY: &str = "creationTime";
const EXECUTION_TIME_KEY: &str = "executionTime";
const OPERATING_SYSTEM_KEY: &str = "operatingSystem";
const HOST_NAME_KEY: &str = "hostName";
const USER_NAME_KEY: &str = "userName";

const HEADER_COMMENT: &str = "Generated origin information";

/// Something whose outputs can be cached, e.g. a task
pub trait CacheableEntity {
    /// Fully qualified name of the entity's kind
    fn type_name(&self) -> &str;

    /// Unique identity, such as a task path
    fn identity(&self) -> &str;

    fn display_name(&self) -> String {
        format!("{} '{}'", self.type_name(), self.identity())
    }
}

/// Resolves the name of the machine writing a record
pub trait HostnameLookup: Send + Sync {
    fn hostname(&self) -> String;
}

/// Looks up the hostname from the operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemHostnameLookup;

impl HostnameLookup for SystemHostnameLookup {
    fn hostname(&self) -> String {
        identity::hostname()
    }
}

impl<F> HostnameLookup for F
where
    F: Fn() -> String + Send + Sync,
{
    fn hostname(&self) -> String {
        self()
    }
}

/// Hook adding extra properties to every written record
pub type PropertiesConfigurator = Arc<dyn Fn(&mut OriginProperties) + Send + Sync>;

/// Everything written for one cached output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginRecord {
    pub build_invocation_id: String,
    pub type_name: String,
    pub identity: String,
    pub creation_time: chrono::DateTime<chrono::Utc>,
    pub execution_time: Duration,
    pub operating_system: String,
    pub host_name: String,
    pub user_name: String,
}

impl OriginRecord {
    pub fn to_properties(&self) -> OriginProperties {
        let mut properties = OriginProperties::new();
        properties.set(BUILD_INVOCATION_ID_KEY, self.build_invocation_id.as_str());
        properties.set(TYPE_KEY, self.type_name.as_str());
        properties.set(IDENTITY_KEY, self.identity.as_str());
        properties.set(
            CREATION_TIME_KEY,
            self.creation_time.timestamp_millis().to_string(),
        );
        properties.set(
            EXECUTION_TIME_KEY,
            self.execution_time.as_millis().to_string(),
        );
        properties.set(OPERATING_SYSTEM_KEY, self.operating_system.as_str());
        properties.set(HOST_NAME_KEY, self.host_name.as_str());
        properties.set(USER_NAME_KEY, self.user_name.as_str());
        properties
    }
}

/// The part of a record a caller needs when reusing an output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginMetadata {
    pub build_invocation_id: String,
    pub execution_time: Duration,
}

/// Creates writers and readers carrying this process's identity
#[derive(Clone)]
pub struct OriginMetadataFactory {
    user_name: String,
    operating_system: String,
    build_invocation_id: String,
    additional_properties: Option<PropertiesConfigurator>,
    hostname_lookup: Arc<dyn HostnameLookup>,
}

impl OriginMetadataFactory {
    pub fn new(
        user_name: impl Into<String>,
        operating_system: impl Into<String>,
        build_invocation_id: impl Into<String>,
        hostname_lookup: Arc<dyn HostnameLookup>,
    ) -> Self {
        Self {
            user_name: user_name.into(),
            operating_system: operating_system.into(),
            build_invocation_id: build_invocation_id.into(),
            additional_properties: None,
            hostname_lookup,
        }
    }

    /// Identity of the running process with a fresh build invocation id
    pub fn for_current_process() -> Self {
        Self::new(
            identity::user_name(),
            identity::operating_system(),
            uuid::Uuid::new_v4().to_string(),
            Arc::new(SystemHostnameLookup),
        )
    }

    pub fn with_additional_properties(mut self, configurator: PropertiesConfigurator) -> Self {
        self.additional_properties = Some(configurator);
        self
    }

    pub fn build_invocation_id(&self) -> &str {
        &self.build_invocation_id
    }

    pub fn create_writer(&self, entity: &dyn CacheableEntity, elapsed: Duration) -> OriginWriter {
        OriginWriter {
            factory: self.clone(),
            type_name: entity.type_name().to_string(),
            identity: entity.identity().to_string(),
            elapsed,
        }
    }

    pub fn create_reader(&self, entity: &dyn CacheableEntity) -> OriginReader {
        OriginReader {
            display_name: entity.display_name(),
        }
    }
}

impl std::fmt::Debug for OriginMetadataFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OriginMetadataFactory")
            .field("user_name", &self.user_name)
            .field("operating_system", &self.operating_system)
            .field("build_invocation_id", &self.build_invocation_id)
            .field("additional_properties", &self.additional_properties.is_some())
            .finish()
    }
}

/// Writes the record of one entity; timestamps are taken at write time
#[derive(Debug)]
pub struct OriginWriter {
    factory: OriginMetadataFactory,
    type_name: String,
    identity: String,
    elapsed: Duration,
}

impl OriginWriter {
    pub fn record(&self) -> OriginRecord {
        OriginRecord {
            build_invocation_id: self.factory.build_invocation_id.clone(),
            type_name: self.type_name.clone(),
            identity: self.identity.clone(),
            creation_time: chrono::Utc::now(),
            execution_time: self.elapsed,
            operating_system: self.factory.operating_system.clone(),
            host_name: self.factory.hostname_lookup.hostname(),
            user_name: self.factory.user_name.clone(),
        }
    }

    pub fn write_to(&self, out: &mut impl Write) -> Result<()> {
        let mut properties = self.record().to_properties();
        if let Some(configure) = &self.factory.additional_properties {
            configure(&mut properties);
        }
        properties
            .store(out, HEADER_COMMENT)
            .map_err(|err| io_error("write", err))
    }
}

/// Reads the record of one entity
#[derive(Debug, Clone)]
pub struct OriginReader {
    display_name: String,
}

impl OriginReader {
    /// # Errors
    ///
    /// `CorruptedOriginMetadata` when the build invocation id or execution
    /// time is missing or malformed; callers treat this as a cache miss.
    pub fn read_from(&self, input: &mut impl Read) -> Result<OriginMetadata> {
        let properties = OriginProperties::load(input).map_err(|err| io_error("read", err))?;
        tracing::debug!(origin = %properties, "Origin for {}", self.display_name);

        let build_invocation_id = properties
            .get(BUILD_INVOCATION_ID_KEY)
            .ok_or_else(|| self.corrupted(format!("missing {BUILD_INVOCATION_ID_KEY}")))?;
        let execution_time = properties
            .get(EXECUTION_TIME_KEY)
            .ok_or_else(|| self.corrupted(format!("missing {EXECUTION_TIME_KEY}")))?;
        let execution_millis: u64 = execution_time.trim().parse().map_err(|_| {
            self.corrupted(format!(
                "{EXECUTION_TIME_KEY} is not an integer: '{execution_time}'"
            ))
        })?;

        Ok(OriginMetadata {
            build_invocation_id: build_invocation_id.to_string(),
            execution_time: Duration::from_millis(execution_millis),
        })
    }

    fn corrupted(&self, reason: String) -> Error {
        Error::corrupted_origin(self.display_name.as_str(), reason)
    }
}
