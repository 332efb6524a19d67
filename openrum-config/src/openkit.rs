use url::Url;

/// Version of the agent, transmitted under the `va` basic key.
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Indicates configuration related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The beacon endpoint is not a parseable URL.
    #[error("invalid beacon endpoint URL")]
    InvalidEndpoint(#[from] url::ParseError),
    /// The beacon endpoint uses a scheme other than http or https.
    #[error("beacon endpoint scheme {0:?} is not supported")]
    UnsupportedScheme(String),
    /// The application id is empty.
    #[error("application id must not be empty")]
    EmptyApplicationId,
}

/// The immutable configuration of one agent instance.
///
/// Everything in here is fixed when the instance is built and transmitted in
/// the immutable part of the beacon prefix.
#[derive(Clone, Debug)]
pub struct OpenKitConfig {
    endpoint: Url,
    application_id: String,
    device_id: i64,
    application_version: String,
    operating_system: String,
    manufacturer: String,
    model_id: String,
}

impl OpenKitConfig {
    /// Starts building a configuration from the mandatory parameters.
    pub fn builder(
        endpoint: impl Into<String>,
        application_id: impl Into<String>,
        device_id: i64,
    ) -> OpenKitConfigBuilder {
        OpenKitConfigBuilder {
            endpoint: endpoint.into(),
            application_id: application_id.into(),
            device_id,
            application_version: AGENT_VERSION.to_owned(),
            operating_system: std::env::consts::OS.to_owned(),
            manufacturer: String::new(),
            model_id: String::new(),
        }
    }

    /// The collector endpoint beacons are sent to.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// The application id assigned by the collector.
    pub fn application_id(&self) -> &str {
        &self.application_id
    }

    /// The device id reported for this installation.
    pub fn device_id(&self) -> i64 {
        self.device_id
    }

    /// The version of the instrumented application.
    pub fn application_version(&self) -> &str {
        &self.application_version
    }

    /// The operating system reported under the `os` key.
    pub fn operating_system(&self) -> &str {
        &self.operating_system
    }

    /// The device manufacturer reported under the `mf` key.
    pub fn manufacturer(&self) -> &str {
        &self.manufacturer
    }

    /// The device model reported under the `md` key.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Builder for [`OpenKitConfig`].
#[derive(Clone, Debug)]
pub struct OpenKitConfigBuilder {
    endpoint: String,
    application_id: String,
    device_id: i64,
    application_version: String,
    operating_system: String,
    manufacturer: String,
    model_id: String,
}

impl OpenKitConfigBuilder {
    /// Sets the version of the instrumented application.
    pub fn with_application_version(mut self, version: impl Into<String>) -> Self {
        self.application_version = version.into();
        self
    }

    /// Sets the reported operating system.
    pub fn with_operating_system(mut self, operating_system: impl Into<String>) -> Self {
        self.operating_system = operating_system.into();
        self
    }

    /// Sets the reported device manufacturer.
    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = manufacturer.into();
        self
    }

    /// Sets the reported device model.
    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    /// Validates the parameters and builds the configuration.
    pub fn build(self) -> Result<OpenKitConfig, ConfigError> {
        let endpoint = Url::parse(&self.endpoint)?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(ConfigError::UnsupportedScheme(endpoint.scheme().to_owned()));
        }

        if self.application_id.is_empty() {
            return Err(ConfigError::EmptyApplicationId);
        }

        Ok(OpenKitConfig {
            endpoint,
            application_id: self.application_id,
            device_id: self.device_id,
            application_version: self.application_version,
            operating_system: self.operating_system,
            manufacturer: self.manufacturer,
            model_id: self.model_id,
        })
    }
}
