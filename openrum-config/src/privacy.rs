use serde::{Deserialize, Serialize};

/// How much user-centric data the application operator allows to be captured.
///
/// The numeric values are transmitted under the `dl` basic key.
#[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataCollectionLevel {
    /// No data is captured at all.
    Off = 0,
    /// Only performance-relevant data is captured.
    Performance = 1,
    /// Everything including user behavior is captured.
    #[default]
    UserBehavior = 2,
}

/// Whether crashes may be reported.
///
/// The numeric values are transmitted under the `cl` basic key.
#[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CrashReportingLevel {
    /// Crashes are never reported.
    Off = 0,
    /// Crashes are reported unless the user opted out.
    OptOutCrashes = 1,
    /// Crashes are reported because the user opted in.
    #[default]
    OptInCrashes = 2,
}

/// The privacy policy evaluated before every record is serialized.
///
/// Each predicate answers whether one kind of record may be produced. The
/// policy is sampled at report time; changing it never retroactively redacts
/// records that are already buffered.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct PrivacyConfig {
    data_collection_level: DataCollectionLevel,
    crash_reporting_level: CrashReportingLevel,
}

impl PrivacyConfig {
    /// Creates a privacy configuration from the two operator-chosen levels.
    pub fn new(
        data_collection_level: DataCollectionLevel,
        crash_reporting_level: CrashReportingLevel,
    ) -> Self {
        Self {
            data_collection_level,
            crash_reporting_level,
        }
    }

    /// The configured data collection level.
    pub fn data_collection_level(&self) -> DataCollectionLevel {
        self.data_collection_level
    }

    /// The configured crash reporting level.
    pub fn crash_reporting_level(&self) -> CrashReportingLevel {
        self.crash_reporting_level
    }

    /// Whether sessions may be reported at all.
    pub fn is_session_reporting_allowed(&self) -> bool {
        self.data_collection_level >= DataCollectionLevel::Performance
    }

    /// Whether completed actions may be reported.
    pub fn is_action_reporting_allowed(&self) -> bool {
        self.data_collection_level == DataCollectionLevel::UserBehavior
    }

    /// Whether reported values may be transmitted.
    pub fn is_value_reporting_allowed(&self) -> bool {
        self.data_collection_level == DataCollectionLevel::UserBehavior
    }

    /// Whether named events and custom events may be transmitted.
    pub fn is_event_reporting_allowed(&self) -> bool {
        self.data_collection_level == DataCollectionLevel::UserBehavior
    }

    /// Whether errors may be reported.
    pub fn is_error_reporting_allowed(&self) -> bool {
        self.data_collection_level >= DataCollectionLevel::Performance
    }

    /// Whether crashes may be reported.
    pub fn is_crash_reporting_allowed(&self) -> bool {
        self.crash_reporting_level == CrashReportingLevel::OptInCrashes
    }

    /// Whether users may be identified.
    pub fn is_user_identification_allowed(&self) -> bool {
        self.data_collection_level == DataCollectionLevel::UserBehavior
    }

    /// Whether web requests may be traced.
    pub fn is_web_request_tracing_allowed(&self) -> bool {
        self.data_collection_level >= DataCollectionLevel::Performance
    }

    /// Whether the real device id may be transmitted.
    ///
    /// When this is denied, a random per-session device id is substituted.
    pub fn is_device_id_sending_allowed(&self) -> bool {
        self.data_collection_level == DataCollectionLevel::UserBehavior
    }

    /// Whether the real session number may be transmitted.
    ///
    /// When this is denied, session number 1 goes on the wire.
    pub fn is_session_number_reporting_allowed(&self) -> bool {
        self.data_collection_level == DataCollectionLevel::UserBehavior
    }
}
