use crate::compare::ComparisonChecks;
use crate::descriptor::{Descriptor, DescriptorSyntaxError, parse_descriptor};
use crate::domain::HarnessError;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Component, Path, PathBuf};

pub const FILES_SECTION: &str = "FILES";
pub const TEST_SECTION: &str = "TEST";

pub const SERVER_LOG_FILE_NAME: &str = "gadgetron.log";
pub const CLIENT_LOG_FILE_NAME: &str = "client.log";

/// Resolved test case, with every path made absolute against the working
/// directory, the output directory or the install root's `schema` folder.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestCaseConfig {
    pub descriptor_path: PathBuf,
    pub working_dir: PathBuf,
    pub output_dir: PathBuf,
    pub raw_input: PathBuf,
    pub intermediate_file: PathBuf,
    pub exchange_file: PathBuf,
    pub result_file: PathBuf,
    pub reference_file: PathBuf,
    pub parameter_schema: PathBuf,
    pub parameter_stylesheet: PathBuf,
    pub server_log: PathBuf,
    pub client_log: PathBuf,
    pub reconstruction_configuration: String,
    pub result_dataset: String,
    pub reference_dataset: String,
    pub checks: ComparisonChecks,
}

impl TestCaseConfig {
    pub fn load(
        descriptor_path: impl AsRef<Path>,
        install_root: impl AsRef<Path>,
        working_dir: impl AsRef<Path>,
    ) -> Result<Self, ConfigError> {
        let descriptor_path = descriptor_path.as_ref();
        let content =
            fs::read_to_string(descriptor_path).map_err(|source| ConfigError::ReadDescriptor {
                path: descriptor_path.to_path_buf(),
                source,
            })?;
        let descriptor =
            parse_descriptor(&content).map_err(|source| ConfigError::ParseDescriptor {
                path: descriptor_path.to_path_buf(),
                source,
            })?;
        let mut config = Self::from_descriptor(&descriptor, install_root, working_dir)?;
        config.descriptor_path = descriptor_path.to_path_buf();
        Ok(config)
    }

    pub fn from_descriptor(
        descriptor: &Descriptor,
        install_root: impl AsRef<Path>,
        working_dir: impl AsRef<Path>,
    ) -> Result<Self, ConfigError> {
        let working_dir = working_dir.as_ref();
        let schema_dir = install_root.as_ref().join("schema");
        for section in [FILES_SECTION, TEST_SECTION] {
            if !descriptor.has_section(section) {
                return Err(ConfigError::MissingSection(section));
            }
        }

        let output_dir = working_dir.join(required(descriptor, FILES_SECTION, "out_folder")?);
        let checks = ComparisonChecks {
            compare_dimensions: required_bool(descriptor, "compare_dimensions")?,
            compare_values: required_bool(descriptor, "compare_values")?,
            compare_scales: required_bool(descriptor, "compare_scales")?,
            threshold_values: required_float(descriptor, "comparison_threshold_values")?,
            threshold_scales: required_float(descriptor, "comparison_threshold_scales")?,
        };

        Ok(Self {
            descriptor_path: PathBuf::new(),
            working_dir: working_dir.to_path_buf(),
            raw_input: working_dir.join(required(descriptor, FILES_SECTION, "siemens_dat")?),
            intermediate_file: output_dir.join(required(descriptor, FILES_SECTION, "siemens_h5")?),
            exchange_file: output_dir.join(required(descriptor, FILES_SECTION, "ismrmrd")?),
            result_file: output_dir.join(required(descriptor, FILES_SECTION, "result_h5")?),
            reference_file: working_dir.join(required(descriptor, FILES_SECTION, "reference_h5")?),
            parameter_schema: schema_dir.join(required(
                descriptor,
                FILES_SECTION,
                "siemens_parameter_xml",
            )?),
            parameter_stylesheet: schema_dir.join(required(
                descriptor,
                FILES_SECTION,
                "siemens_parameter_xsl",
            )?),
            server_log: output_dir.join(SERVER_LOG_FILE_NAME),
            client_log: output_dir.join(CLIENT_LOG_FILE_NAME),
            output_dir,
            reconstruction_configuration: required(
                descriptor,
                TEST_SECTION,
                "gadgetron_configuration",
            )?
            .to_string(),
            result_dataset: required(descriptor, TEST_SECTION, "result_dataset")?.to_string(),
            reference_dataset: required(descriptor, TEST_SECTION, "reference_dataset")?
                .to_string(),
            checks,
        })
    }

    /// Checks that every file the pipeline reads already exists and that
    /// recreating the output folder cannot delete any of them.
    pub fn validate_inputs(&self) -> Result<(), ConfigError> {
        let inputs = [
            (InputRole::RawInput, &self.raw_input),
            (InputRole::Reference, &self.reference_file),
            (InputRole::ParameterSchema, &self.parameter_schema),
            (InputRole::ParameterStylesheet, &self.parameter_stylesheet),
        ];
        for (role, path) in inputs {
            if !path.is_file() {
                return Err(ConfigError::MissingInput {
                    role,
                    path: path.clone(),
                });
            }
        }
        self.check_output_dir_is_disjoint()
    }

    fn check_output_dir_is_disjoint(&self) -> Result<(), ConfigError> {
        let output_dir = lexically_normalize(&self.output_dir);
        let descriptor_path = if self.descriptor_path.is_relative() {
            self.working_dir.join(&self.descriptor_path)
        } else {
            self.descriptor_path.clone()
        };
        let protected = [
            &self.working_dir,
            &self.raw_input,
            &self.reference_file,
            &self.parameter_schema,
            &self.parameter_stylesheet,
            &descriptor_path,
        ];
        for path in protected {
            if lexically_normalize(path).starts_with(&output_dir) {
                return Err(ConfigError::OverlappingOutputDir {
                    output_dir: self.output_dir.clone(),
                    protected: path.clone(),
                });
            }
        }
        Ok(())
    }

    /// Removes any previous output directory and creates an empty one.
    pub fn prepare_output_dir(&self) -> Result<(), ConfigError> {
        if self.output_dir.exists() {
            fs::remove_dir_all(&self.output_dir).map_err(|source| ConfigError::OutputDir {
                path: self.output_dir.clone(),
                source,
            })?;
        }
        fs::create_dir_all(&self.output_dir).map_err(|source| ConfigError::OutputDir {
            path: self.output_dir.clone(),
            source,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputRole {
    RawInput,
    Reference,
    ParameterSchema,
    ParameterStylesheet,
}

impl InputRole {
    pub const fn description(self) -> &'static str {
        match self {
            Self::RawInput => "Siemens file",
            Self::Reference => "reference HDF5 file",
            Self::ParameterSchema => "Siemens parameter XML",
            Self::ParameterStylesheet => "Siemens parameter XSL",
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadDescriptor {
        path: PathBuf,
        source: std::io::Error,
    },
    ParseDescriptor {
        path: PathBuf,
        source: DescriptorSyntaxError,
    },
    MissingSection(&'static str),
    MissingKey {
        section: &'static str,
        key: &'static str,
    },
    InvalidBool {
        key: &'static str,
        value: String,
    },
    InvalidFloat {
        key: &'static str,
        value: String,
    },
    MissingInput {
        role: InputRole,
        path: PathBuf,
    },
    OverlappingOutputDir {
        output_dir: PathBuf,
        protected: PathBuf,
    },
    OutputDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadDescriptor { path, source } => write!(
                f,
                "failed to read test case '{}': {}",
                path.display(),
                source
            ),
            Self::ParseDescriptor { path, source } => write!(
                f,
                "failed to parse test case '{}': {}",
                path.display(),
                source
            ),
            Self::MissingSection(section) => {
                write!(f, "test case is missing section [{}]", section)
            }
            Self::MissingKey { section, key } => {
                write!(f, "test case is missing '{}' in section [{}]", key, section)
            }
            Self::InvalidBool { key, value } => {
                write!(f, "'{}' is not a boolean: '{}'", key, value)
            }
            Self::InvalidFloat { key, value } => {
                write!(f, "'{}' is not a finite number: '{}'", key, value)
            }
            Self::MissingInput { role, path } => {
                write!(f, "Can't find {} {}", role.description(), path.display())
            }
            Self::OverlappingOutputDir {
                output_dir,
                protected,
            } => write!(
                f,
                "output folder '{}' would delete '{}' when it is recreated",
                output_dir.display(),
                protected.display()
            ),
            Self::OutputDir { path, source } => write!(
                f,
                "failed to recreate output folder '{}': {}",
                path.display(),
                source
            ),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::ReadDescriptor { source, .. } => Some(source),
            Self::ParseDescriptor { source, .. } => Some(source),
            Self::OutputDir { source, .. } => Some(source),
            Self::MissingSection(_)
            | Self::MissingKey { .. }
            | Self::InvalidBool { .. }
            | Self::InvalidFloat { .. }
            | Self::MissingInput { .. }
            | Self::OverlappingOutputDir { .. } => None,
        }
    }
}

impl From<ConfigError> for HarnessError {
    fn from(error: ConfigError) -> Self {
        let message = error.to_string();
        match error {
            ConfigError::ReadDescriptor { .. } => {
                HarnessError::setup("SETUP.READ_TEST_CASE", message)
            }
            ConfigError::ParseDescriptor { .. }
            | ConfigError::MissingSection(_)
            | ConfigError::MissingKey { .. }
            | ConfigError::InvalidBool { .. }
            | ConfigError::InvalidFloat { .. } => {
                HarnessError::setup("SETUP.INVALID_TEST_CASE", message)
            }
            ConfigError::MissingInput { .. } => {
                HarnessError::setup("SETUP.MISSING_INPUT", message)
            }
            ConfigError::OverlappingOutputDir { .. } => {
                HarnessError::setup("SETUP.OUTPUT_FOLDER_OVERLAP", message)
            }
            ConfigError::OutputDir { .. } => {
                HarnessError::io_system("IO.OUTPUT_FOLDER", message)
            }
        }
    }
}

fn required<'a>(
    descriptor: &'a Descriptor,
    section: &'static str,
    key: &'static str,
) -> Result<&'a str, ConfigError> {
    descriptor
        .get(section, key)
        .ok_or(ConfigError::MissingKey { section, key })
}

fn required_bool(descriptor: &Descriptor, key: &'static str) -> Result<bool, ConfigError> {
    let value = required(descriptor, TEST_SECTION, key)?;
    parse_bool(value).ok_or_else(|| ConfigError::InvalidBool {
        key,
        value: value.to_string(),
    })
}

fn required_float(descriptor: &Descriptor, key: &'static str) -> Result<f64, ConfigError> {
    let value = required(descriptor, TEST_SECTION, key)?;
    value
        .parse::<f64>()
        .ok()
        .filter(|parsed| parsed.is_finite())
        .ok_or_else(|| ConfigError::InvalidFloat {
            key,
            value: value.to_string(),
        })
}

/// Resolves `.` and `..` components without touching the filesystem.
fn lexically_normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component);
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "yes" | "true" | "on" => Some(true),
        "0" | "no" | "false" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, InputRole, TestCaseConfig};
    use crate::descriptor::parse_descriptor;
    use crate::domain::{HarnessError, HarnessErrorCategory};
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    const DESCRIPTOR: &str = r#"
[FILES]
siemens_dat: data/simple_gre/meas_MID00133_simple_gre.dat
siemens_h5: simple_gre.h5
ismrmrd: simple_gre_ismrmrd.h5
result_h5: simple_gre_out.h5
reference_h5: data/simple_gre/simple_gre_out.h5
out_folder: test/simple_gre
siemens_parameter_xml: IsmrmrdParameterMap_Siemens.xml
siemens_parameter_xsl: IsmrmrdParameterMap_Siemens.xsl

[TEST]
gadgetron_configuration: default.xml
reference_dataset: simple_gre_out.h5/image_0/data
result_dataset: simple_gre_out.h5/image_0/data
compare_dimensions: 1
compare_values: True
compare_scales: off
comparison_threshold_values: 0.01
comparison_threshold_scales: 0.01
"#;

    fn load_from(source: &str) -> Result<TestCaseConfig, ConfigError> {
        let descriptor = parse_descriptor(source).expect("descriptor should parse");
        TestCaseConfig::from_descriptor(&descriptor, "/opt/gadgetron", "/work")
    }

    #[test]
    fn resolves_paths_against_working_output_and_schema_dirs() {
        let config = load_from(DESCRIPTOR).expect("config should load");

        assert_eq!(config.output_dir, PathBuf::from("/work/test/simple_gre"));
        assert_eq!(
            config.raw_input,
            PathBuf::from("/work/data/simple_gre/meas_MID00133_simple_gre.dat")
        );
        assert_eq!(
            config.intermediate_file,
            PathBuf::from("/work/test/simple_gre/simple_gre.h5")
        );
        assert_eq!(
            config.result_file,
            PathBuf::from("/work/test/simple_gre/simple_gre_out.h5")
        );
        assert_eq!(
            config.reference_file,
            PathBuf::from("/work/data/simple_gre/simple_gre_out.h5")
        );
        assert_eq!(
            config.parameter_schema,
            PathBuf::from("/opt/gadgetron/schema/IsmrmrdParameterMap_Siemens.xml")
        );
        assert_eq!(
            config.server_log,
            PathBuf::from("/work/test/simple_gre/gadgetron.log")
        );
        assert_eq!(
            config.client_log,
            PathBuf::from("/work/test/simple_gre/client.log")
        );
        assert_eq!(config.reconstruction_configuration, "default.xml");
        assert_eq!(config.result_dataset, "simple_gre_out.h5/image_0/data");
    }

    #[test]
    fn parses_comparison_switches_and_thresholds() {
        let config = load_from(DESCRIPTOR).expect("config should load");

        assert!(config.checks.compare_dimensions);
        assert!(config.checks.compare_values);
        assert!(!config.checks.compare_scales);
        assert_eq!(config.checks.threshold_values, 0.01);
        assert_eq!(config.checks.threshold_scales, 0.01);
    }

    #[test]
    fn missing_key_is_reported_with_its_section() {
        let source = DESCRIPTOR.replace("result_dataset: simple_gre_out.h5/image_0/data\n", "");
        let error = load_from(&source).unwrap_err();

        assert!(matches!(
            error,
            ConfigError::MissingKey {
                section: "TEST",
                key: "result_dataset"
            }
        ));
    }

    #[test]
    fn missing_section_is_rejected() {
        let error = load_from("[FILES]\nout_folder = out\n").unwrap_err();
        assert!(matches!(error, ConfigError::MissingSection("TEST")));
    }

    #[test]
    fn non_numeric_threshold_is_rejected() {
        let source = DESCRIPTOR.replace(
            "comparison_threshold_values: 0.01",
            "comparison_threshold_values: tight",
        );
        let error = load_from(&source).unwrap_err();

        assert!(matches!(
            error,
            ConfigError::InvalidFloat {
                key: "comparison_threshold_values",
                ..
            }
        ));
        let harness: HarnessError = error.into();
        assert_eq!(harness.category(), HarnessErrorCategory::SetupError);
        assert_eq!(harness.placeholder(), "SETUP.INVALID_TEST_CASE");
    }

    #[test]
    fn invalid_boolean_is_rejected() {
        let source = DESCRIPTOR.replace("compare_scales: off", "compare_scales: maybe");
        let error = load_from(&source).unwrap_err();
        assert_eq!(error.to_string(), "'compare_scales' is not a boolean: 'maybe'");
    }

    #[test]
    fn load_reads_descriptor_from_disk() {
        let temp = TempDir::new().expect("tempdir should be created");
        let descriptor_path = temp.path().join("simple_gre.cfg");
        fs::write(&descriptor_path, DESCRIPTOR).expect("descriptor should be written");

        let config = TestCaseConfig::load(&descriptor_path, "/opt/gadgetron", temp.path())
            .expect("config should load");
        assert_eq!(config.descriptor_path, descriptor_path);
        assert_eq!(config.output_dir, temp.path().join("test/simple_gre"));

        let error =
            TestCaseConfig::load(temp.path().join("absent.cfg"), "/opt/gadgetron", temp.path())
                .unwrap_err();
        assert!(matches!(error, ConfigError::ReadDescriptor { .. }));
    }

    #[test]
    fn validate_inputs_names_the_first_missing_file() {
        let temp = TempDir::new().expect("tempdir should be created");
        let install_root = temp.path().join("install");
        let descriptor = parse_descriptor(DESCRIPTOR).expect("descriptor should parse");
        let config = TestCaseConfig::from_descriptor(&descriptor, &install_root, temp.path())
            .expect("config should load");

        let error = config.validate_inputs().unwrap_err();
        assert!(matches!(
            error,
            ConfigError::MissingInput {
                role: InputRole::RawInput,
                ..
            }
        ));
        assert!(error.to_string().starts_with("Can't find Siemens file "));

        touch(&config.raw_input);
        touch(&config.reference_file);
        touch(&config.parameter_schema);
        let error = config.validate_inputs().unwrap_err();
        assert!(matches!(
            error,
            ConfigError::MissingInput {
                role: InputRole::ParameterStylesheet,
                ..
            }
        ));

        touch(&config.parameter_stylesheet);
        config.validate_inputs().expect("all inputs exist");
    }

    #[test]
    fn prepare_output_dir_discards_stale_artifacts() {
        let temp = TempDir::new().expect("tempdir should be created");
        let descriptor = parse_descriptor(DESCRIPTOR).expect("descriptor should parse");
        let config = TestCaseConfig::from_descriptor(&descriptor, "/opt/gadgetron", temp.path())
            .expect("config should load");

        touch(&config.result_file);
        assert!(config.result_file.exists());

        config.prepare_output_dir().expect("output dir should be recreated");
        assert!(config.output_dir.is_dir());
        assert!(!config.result_file.exists());
    }

    #[test]
    fn output_dir_containing_inputs_is_rejected_before_deletion() {
        let temp = TempDir::new().expect("tempdir should be created");
        let source = DESCRIPTOR.replace("out_folder: test/simple_gre", "out_folder: data");
        let descriptor = parse_descriptor(&source).expect("descriptor should parse");
        let config = TestCaseConfig::from_descriptor(&descriptor, temp.path(), temp.path())
            .expect("config should load");
        for input in [
            &config.raw_input,
            &config.reference_file,
            &config.parameter_schema,
            &config.parameter_stylesheet,
        ] {
            touch(input);
        }

        let error = config.validate_inputs().unwrap_err();
        assert!(matches!(error, ConfigError::OverlappingOutputDir { .. }));
        let harness: HarnessError = error.into();
        assert_eq!(harness.placeholder(), "SETUP.OUTPUT_FOLDER_OVERLAP");
        assert!(config.raw_input.is_file());
        assert!(config.reference_file.is_file());
    }

    #[test]
    fn output_dir_resolving_to_working_dir_is_rejected() {
        for out_folder in [".", "test/..", "../work-sibling/.."] {
            let source = DESCRIPTOR.replace(
                "out_folder: test/simple_gre",
                &format!("out_folder: {out_folder}"),
            );
            let config = load_from(&source).expect("config should load");
            let error = config.check_output_dir_is_disjoint().unwrap_err();
            assert!(
                matches!(error, ConfigError::OverlappingOutputDir { .. }),
                "{out_folder}: {error}"
            );
        }

        let config = load_from(DESCRIPTOR).expect("config should load");
        config
            .check_output_dir_is_disjoint()
            .expect("nested output folder leaves inputs alone");
    }

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("parent dir should be created");
        }
        fs::write(path, b"").expect("file should be written");
    }
}
