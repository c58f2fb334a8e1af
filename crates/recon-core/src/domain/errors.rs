use std::error::Error;
use std::fmt::{Display, Formatter};

pub type HarnessResult<T> = Result<T, HarnessError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HarnessErrorCategory {
    Usage,
    SetupError,
    IoSystemError,
    InternalError,
}

impl HarnessErrorCategory {
    /// Harness errors abort before a verdict exists; only completed runs
    /// report the test-failure sentinel.
    pub const fn exit_code(self) -> i32 {
        1
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Usage => "Usage",
            Self::SetupError => "SetupError",
            Self::IoSystemError => "IoSystemError",
            Self::InternalError => "InternalError",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessError {
    category: HarnessErrorCategory,
    placeholder: &'static str,
    message: String,
}

impl HarnessError {
    pub fn new(
        category: HarnessErrorCategory,
        placeholder: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            placeholder,
            message: message.into(),
        }
    }

    pub fn usage(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(HarnessErrorCategory::Usage, placeholder, message)
    }

    pub fn setup(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(HarnessErrorCategory::SetupError, placeholder, message)
    }

    pub fn io_system(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(HarnessErrorCategory::IoSystemError, placeholder, message)
    }

    pub fn internal(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(HarnessErrorCategory::InternalError, placeholder, message)
    }

    pub const fn category(&self) -> HarnessErrorCategory {
        self.category
    }

    pub const fn placeholder(&self) -> &'static str {
        self.placeholder
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn exit_code(&self) -> i32 {
        self.category.exit_code()
    }

    pub fn diagnostic_line(&self) -> String {
        format!("ERROR: [{}] {}", self.placeholder, self.message)
    }
}

impl Display for HarnessError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}] {}",
            self.category.as_str(),
            self.placeholder,
            self.message
        )
    }
}

impl Error for HarnessError {}
