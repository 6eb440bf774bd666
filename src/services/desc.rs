//! Service descriptions: the construction-time inputs for a service record
//!
//! A description names the service, its kind, its outgoing dependencies and
//! the flags that shape its startup. Parsing description files into these
//! structures is the job of an external collaborator implementing
//! [`ServiceLoader`].

use super::state::StopReason;

/// What kind of work the service represents. Determines how termination of
/// the underlying work is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ServiceKind {
    /// No process of its own; started/stopped purely by the state machine.
    #[default]
    Internal,
    /// A supervised foreground process.
    Process,
    /// A process that forks into the background.
    Bgprocess,
    /// A script run to start and again to stop.
    Scripted,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::Process => "process",
            Self::Bgprocess => "bgprocess",
            Self::Scripted => "scripted",
        }
    }

    /// Whether a stop with the given reason counts as the service finishing
    /// its work on its own. Only process-style services self-terminate;
    /// an internal service has nothing to finish.
    pub fn did_finish(&self, reason: StopReason) -> bool {
        match self {
            Self::Internal => false,
            Self::Process | Self::Bgprocess | Self::Scripted => reason == StopReason::Terminated,
        }
    }
}

/// Dependency edge kind.
///
/// `Regular` and `Milestone` are hard: failure of the dependency fails the
/// dependent. `WaitsFor` and `Soft` only delay the dependent's start until
/// the dependency reaches a terminal state once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepType {
    Regular,
    Milestone,
    WaitsFor,
    Soft,
}

impl DepType {
    pub fn is_hard(&self) -> bool {
        matches!(self, Self::Regular | Self::Milestone)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Regular => "regular",
            Self::Milestone => "milestone",
            Self::WaitsFor => "waits-for",
            Self::Soft => "soft",
        }
    }
}

/// Startup behavior flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OnstartFlags {
    /// Hold the console while starting.
    pub starts_on_console: bool,
    /// Keep the console after starting.
    pub runs_on_console: bool,
    /// Once started, the root filesystem is read-write.
    pub rw_ready: bool,
    /// Once started, the external log daemon is available.
    pub log_ready: bool,
}

/// Construction-time parameters for a service record.
#[derive(Debug, Clone)]
pub struct ServiceParams {
    pub name: String,
    pub kind: ServiceKind,
    pub flags: OnstartFlags,
    /// Restart automatically after an unexpected stop.
    pub auto_restart: bool,
    /// Restart the underlying process in place, without leaving Started,
    /// when it terminates unexpectedly (process-style kinds only).
    pub smooth_recovery: bool,
    /// Service to start when this one self-terminates successfully.
    pub start_on_completion: Option<String>,
}

impl ServiceParams {
    pub fn new(name: &str, kind: ServiceKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            flags: OnstartFlags::default(),
            auto_restart: false,
            smooth_recovery: false,
            start_on_completion: None,
        }
    }
}

/// A loaded description: parameters plus named outgoing dependencies, in
/// declaration order.
#[derive(Debug, Clone)]
pub struct ServiceDescription {
    pub params: ServiceParams,
    pub depends: Vec<(String, DepType)>,
}

/// Source of service descriptions, consulted by
/// [`crate::manager::ServiceSet::load_service`].
pub trait ServiceLoader {
    fn load(&mut self, name: &str) -> Result<ServiceDescription, LoadError>;
}

/// A loader for a closed world: every service is added up front and nothing
/// can be loaded by name.
pub struct NullLoader;

impl ServiceLoader for NullLoader {
    fn load(&mut self, name: &str) -> Result<ServiceDescription, LoadError> {
        Err(LoadError::NotFound {
            name: name.to_string(),
        })
    }
}

/// Failure to load a service description.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("service not found: {name}")]
    NotFound { name: String },

    #[error("service description cycle involving {name}")]
    DependencyCycle { name: String },

    #[error("bad description for {name}: {detail}")]
    Description { name: String, detail: String },
}

impl LoadError {
    /// Name of the service the error is about.
    pub fn service_name(&self) -> &str {
        match self {
            Self::NotFound { name }
            | Self::DependencyCycle { name }
            | Self::Description { name, .. } => name,
        }
    }
}
