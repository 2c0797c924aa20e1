use crate::capture;
use crate::finding::{Finding, FindingReporter};
use crate::provider::FuzzedDataProvider;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

pub type BytesTarget = Box<dyn Fn(&[u8]) + Send + Sync>;
pub type ProviderTarget = Box<dyn Fn(&mut dyn FuzzedDataProvider) + Send + Sync>;
pub type TearDown = Box<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum BindingError {
    #[error(
        "{0} must define exactly one of the following two functions:\n\
         fn fuzzer_test_one_input(data: &[u8])\n\
         fn fuzzer_test_one_input(provider: &mut dyn FuzzedDataProvider)"
    )]
    EntryPoint(String),
    #[error("fuzz target name {0:?} is not a Rust path")]
    InvalidName(String),
}

/// How the target consumes its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationMode {
    Bytes,
    Provider,
}

impl InvocationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvocationMode::Bytes => "bytes",
            InvocationMode::Provider => "provider",
        }
    }
}

impl fmt::Display for InvocationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvocationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bytes" => Ok(InvocationMode::Bytes),
            "provider" => Ok(InvocationMode::Provider),
            other => Err(format!("unknown invocation mode {other:?}")),
        }
    }
}

/// The resolved entry point.
pub enum TestOneInput {
    Bytes(BytesTarget),
    Provider(ProviderTarget),
}

impl TestOneInput {
    pub fn mode(&self) -> InvocationMode {
        match self {
            TestOneInput::Bytes(_) => InvocationMode::Bytes,
            TestOneInput::Provider(_) => InvocationMode::Provider,
        }
    }
}

enum Initialize {
    NoArgs(Box<dyn Fn() + Send + Sync>),
    WithArgs(Box<dyn Fn(&[String]) + Send + Sync>),
}

/// Writes a reproducer for targets whose inputs are derived by the harness itself.
pub trait AutofuzzReproducer: Send + Sync {
    fn dump_reproducer(
        &self,
        provider: &mut dyn FuzzedDataProvider,
        reproducer_dir: &Path,
        content_hash: &str,
    ) -> anyhow::Result<()>;
}

/// A fuzz target bound to exactly one entry point plus its optional lifecycle hooks.
pub struct FuzzTarget {
    name: String,
    entry: TestOneInput,
    initialize: Option<Initialize>,
    tear_down: Option<TearDown>,
    autofuzz: Option<Box<dyn AutofuzzReproducer>>,
    reporter: FindingReporter,
}

impl FuzzTarget {
    pub fn builder(name: impl Into<String>) -> FuzzTargetBuilder {
        FuzzTargetBuilder {
            name: name.into(),
            bytes: None,
            provider: None,
            initialize: None,
            initialize_with_args: None,
            tear_down: None,
            autofuzz: None,
            reporter: None,
        }
    }

    /// Path of the target function, used as its identity in reproducers.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> InvocationMode {
        self.entry.mode()
    }

    pub fn entry(&self) -> &TestOneInput {
        &self.entry
    }

    pub fn reporter(&self) -> &FindingReporter {
        &self.reporter
    }

    pub fn autofuzz(&self) -> Option<&dyn AutofuzzReproducer> {
        self.autofuzz.as_deref()
    }

    pub(crate) fn take_tear_down(&mut self) -> Option<TearDown> {
        self.tear_down.take()
    }

    /// Runs the initialize hook, if any. The variant taking arguments wins when both exist.
    pub fn initialize(&self, args: &[String]) -> Result<(), Finding> {
        match &self.initialize {
            None => Ok(()),
            Some(Initialize::WithArgs(init)) => {
                capture::catch_finding(|| capture::target_boundary_hook(&|| init(args)))
            }
            Some(Initialize::NoArgs(init)) => {
                capture::catch_finding(|| capture::target_boundary_hook(&|| init()))
            }
        }
    }
}

impl fmt::Debug for FuzzTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FuzzTarget")
            .field("name", &self.name)
            .field("mode", &self.mode())
            .field("initialize", &self.initialize.is_some())
            .field("tear_down", &self.tear_down.is_some())
            .field("autofuzz", &self.autofuzz.is_some())
            .finish()
    }
}

pub struct FuzzTargetBuilder {
    name: String,
    bytes: Option<BytesTarget>,
    provider: Option<ProviderTarget>,
    initialize: Option<Box<dyn Fn() + Send + Sync>>,
    initialize_with_args: Option<Box<dyn Fn(&[String]) + Send + Sync>>,
    tear_down: Option<TearDown>,
    autofuzz: Option<Box<dyn AutofuzzReproducer>>,
    reporter: Option<FindingReporter>,
}

impl FuzzTargetBuilder {
    pub fn bytes(mut self, f: impl Fn(&[u8]) + Send + Sync + 'static) -> Self {
        self.bytes = Some(Box::new(f));
        self
    }

    pub fn provider(
        mut self,
        f: impl Fn(&mut dyn FuzzedDataProvider) + Send + Sync + 'static,
    ) -> Self {
        self.provider = Some(Box::new(f));
        self
    }

    pub fn initialize(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.initialize = Some(Box::new(f));
        self
    }

    pub fn initialize_with_args(mut self, f: impl Fn(&[String]) + Send + Sync + 'static) -> Self {
        self.initialize_with_args = Some(Box::new(f));
        self
    }

    pub fn tear_down(mut self, f: impl Fn() -> anyhow::Result<()> + Send + Sync + 'static) -> Self {
        self.tear_down = Some(Box::new(f));
        self
    }

    pub fn autofuzz(mut self, reproducer: impl AutofuzzReproducer + 'static) -> Self {
        self.autofuzz = Some(Box::new(reproducer));
        self
    }

    /// Channel the target uses for explicit reports. Defaults to [`FindingReporter::global`].
    pub fn reporter(mut self, reporter: FindingReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn build(self) -> Result<FuzzTarget, BindingError> {
        if self.name.is_empty()
            || !self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
        {
            return Err(BindingError::InvalidName(self.name));
        }
        let entry = match (self.bytes, self.provider) {
            (Some(bytes), None) => TestOneInput::Bytes(bytes),
            (None, Some(provider)) => TestOneInput::Provider(provider),
            _ => return Err(BindingError::EntryPoint(self.name)),
        };
        let initialize = match (self.initialize_with_args, self.initialize) {
            (Some(with_args), _) => Some(Initialize::WithArgs(with_args)),
            (None, Some(no_args)) => Some(Initialize::NoArgs(no_args)),
            (None, None) => None,
        };
        Ok(FuzzTarget {
            name: self.name,
            entry,
            initialize,
            tear_down: self.tear_down,
            autofuzz: self.autofuzz,
            reporter: self
                .reporter
                .unwrap_or_else(|| FindingReporter::global().clone()),
        })
    }
}
