use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::pipeline::PipelineError;

/// Macro to generate enum with as_str + from_name lookup
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$(Self::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }

            fn from_name(s: &str) -> Option<Self> {
                match s {
                    $($s => Some(Self::$variant)),+,
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(GroupingMode {
    Cases => "cases",
    Patients => "patients",
});

str_enum!(OutputFormat {
    Csv => "csv",
    Parquet => "parquet",
    Jsonl => "jsonl",
});

impl std::str::FromStr for GroupingMode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| PipelineError::InvalidGroupingMode(s.to_string()))
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_lowercase();
        match name.as_str() {
            "pq" => Ok(Self::Parquet),
            other => Self::from_name(other)
                .ok_or_else(|| PipelineError::UnsupportedOutputFormat(s.to_string())),
        }
    }
}

impl OutputFormat {
    /// Pick the format for `path`: an explicit name wins, then the file
    /// extension, then CSV when the path has no extension at all.
    pub fn resolve(path: &Path, explicit: Option<&str>) -> Result<Self, PipelineError> {
        if let Some(name) = explicit.filter(|n| !n.trim().is_empty()) {
            return name.parse();
        }
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if !ext.is_empty() => ext.parse(),
            _ => Ok(Self::Csv),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grouping_mode_round_trips_names() {
        for mode in GroupingMode::ALL {
            assert_eq!(mode.as_str().parse::<GroupingMode>().unwrap(), *mode);
        }
    }

    #[test]
    fn grouping_mode_rejects_unknown() {
        let err = "encounters".parse::<GroupingMode>().unwrap_err();
        assert!(matches!(err, PipelineError::InvalidGroupingMode(ref m) if m == "encounters"));
    }

    #[test]
    fn grouping_mode_is_case_sensitive() {
        assert!("Cases".parse::<GroupingMode>().is_err());
    }

    #[test]
    fn output_format_accepts_parquet_alias() {
        assert_eq!("pq".parse::<OutputFormat>().unwrap(), OutputFormat::Parquet);
        assert_eq!("JSONL".parse::<OutputFormat>().unwrap(), OutputFormat::Jsonl);
    }

    #[test]
    fn output_format_inferred_from_extension() {
        let resolve = |p: &str| OutputFormat::resolve(Path::new(p), None);
        assert_eq!(resolve("out/demo.parquet").unwrap(), OutputFormat::Parquet);
        assert_eq!(resolve("out/demo.PQ").unwrap(), OutputFormat::Parquet);
        assert_eq!(resolve("out/demo.jsonl").unwrap(), OutputFormat::Jsonl);
        assert_eq!(resolve("out/demo").unwrap(), OutputFormat::Csv);
    }

    #[test]
    fn explicit_format_overrides_extension() {
        let fmt = OutputFormat::resolve(Path::new("out/demo.csv"), Some("jsonl")).unwrap();
        assert_eq!(fmt, OutputFormat::Jsonl);
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let err = OutputFormat::resolve(Path::new("out/demo.xlsx"), None).unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedOutputFormat(ref f) if f == "xlsx"));
    }
}
