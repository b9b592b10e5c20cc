//! Configuration matrix for the mounted service
//!
//! Enumerates the Cartesian product of independent option axes and maps each
//! resulting tuple onto sshfs command-line options.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use crate::config::ConfigError;

/// Connection count used when the `multiconn` axis is enabled
pub const MULTICONN_MAX_CONNS: u32 = 3;

const UNAME_FILE: &str = "unamefile.txt";
const GNAME_FILE: &str = "gnamefile.txt";

/// Contents written to the user mapping file for `namemap=file`
pub const UNAME_MAP_CONTENT: &str = "foo_user:root\n";

/// Contents written to the group mapping file for `namemap=file`
pub const GNAME_MAP_CONTENT: &str = "bar_group:root\n";

pub const AXIS_DEBUG: &str = "debug";
pub const AXIS_CACHE_TIMEOUT: &str = "cache_timeout";
pub const AXIS_SYNC_RD: &str = "sync_rd";
pub const AXIS_MULTICONN: &str = "multiconn";
pub const AXIS_NAMEMAP: &str = "namemap";

/// A single candidate value of an axis
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum AxisValue {
    Bool(bool),
    Int(u64),
    Str(String),
}

impl fmt::Display for AxisValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AxisValue::Bool(b) => write!(f, "{}", b),
            AxisValue::Int(n) => write!(f, "{}", n),
            AxisValue::Str(s) => f.write_str(s),
        }
    }
}

impl From<bool> for AxisValue {
    fn from(value: bool) -> Self {
        AxisValue::Bool(value)
    }
}

impl From<u64> for AxisValue {
    fn from(value: u64) -> Self {
        AxisValue::Int(value)
    }
}

impl From<&str> for AxisValue {
    fn from(value: &str) -> Self {
        AxisValue::Str(value.to_string())
    }
}

/// A named, ordered set of candidate values
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Axis {
    pub name: String,
    pub values: Vec<AxisValue>,
}

impl Axis {
    pub fn new<V: Into<AxisValue>>(name: &str, values: impl IntoIterator<Item = V>) -> Self {
        Self {
            name: name.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

/// Identity-mapping policy passed to sshfs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NameMapMode {
    #[default]
    None,
    User,
    File,
    /// `namemap=file` with both mapping files present but empty
    FileEmpty,
}

impl NameMapMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            NameMapMode::None => "none",
            NameMapMode::User => "user",
            NameMapMode::File => "file",
            NameMapMode::FileEmpty => "file_empty",
        }
    }

    /// Paths of the (user, group) mapping files inside `conf_dir`, if this mode uses them
    pub fn mapping_files(&self, conf_dir: &Path) -> Option<(PathBuf, PathBuf)> {
        match self {
            NameMapMode::File | NameMapMode::FileEmpty => {
                Some((conf_dir.join(UNAME_FILE), conf_dir.join(GNAME_FILE)))
            }
            NameMapMode::None | NameMapMode::User => None,
        }
    }

    /// Write the mapping files this mode expects. No-op for modes without files.
    pub fn write_mapping_files(&self, conf_dir: &Path) -> std::io::Result<()> {
        let Some((uname, gname)) = self.mapping_files(conf_dir) else {
            return Ok(());
        };
        let (uname_content, gname_content) = match self {
            NameMapMode::File => (UNAME_MAP_CONTENT, GNAME_MAP_CONTENT),
            _ => ("", ""),
        };
        std::fs::write(uname, uname_content)?;
        std::fs::write(gname, gname_content)
    }
}

impl FromStr for NameMapMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(NameMapMode::None),
            "user" => Ok(NameMapMode::User),
            "file" => Ok(NameMapMode::File),
            "file_empty" => Ok(NameMapMode::FileEmpty),
            other => Err(ConfigError::InvalidAxisValue {
                axis: AXIS_NAMEMAP.to_string(),
                value: other.to_string(),
                expected: "one of none, user, file, file_empty",
            }),
        }
    }
}

impl fmt::Display for NameMapMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One concrete point of the matrix: axis name to chosen value, in axis order
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfigurationTuple {
    entries: Vec<(String, AxisValue)>,
}

impl ConfigurationTuple {
    pub fn entries(&self) -> &[(String, AxisValue)] {
        &self.entries
    }

    pub fn get(&self, axis: &str) -> Option<&AxisValue> {
        self.entries
            .iter()
            .find(|(name, _)| name == axis)
            .map(|(_, value)| value)
    }

    /// Stable identifier, e.g. `debug=false-cache_timeout=0`
    pub fn id(&self) -> String {
        self.to_string()
    }

    /// Command-line options for this tuple, axis by axis in tuple order
    pub fn to_args(&self, conf_dir: &Path) -> Result<Vec<String>, ConfigError> {
        let mut args = Vec::new();
        for (name, value) in &self.entries {
            args.extend(axis_args(name, value, conf_dir)?);
        }
        Ok(args)
    }
}

impl fmt::Display for ConfigurationTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str("-")?;
            }
            write!(f, "{}={}", name, value)?;
        }
        Ok(())
    }
}

/// The full set of axes to sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigMatrix {
    axes: Vec<Axis>,
}

impl ConfigMatrix {
    /// Build a matrix, rejecting duplicate axis names and empty axes
    pub fn new(axes: Vec<Axis>) -> Result<Self, ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for axis in &axes {
            if !seen.insert(axis.name.as_str()) {
                return Err(ConfigError::DuplicateAxis(axis.name.clone()));
            }
            if axis.values.is_empty() {
                return Err(ConfigError::EmptyAxis(axis.name.clone()));
            }
        }
        Ok(Self { axes })
    }

    /// Axes swept by default
    pub fn default_axes() -> Vec<Axis> {
        vec![
            Axis::new(AXIS_DEBUG, [false, true]),
            Axis::new(AXIS_CACHE_TIMEOUT, [0u64, 1]),
            Axis::new(AXIS_SYNC_RD, [true, false]),
            Axis::new(AXIS_MULTICONN, [true, false]),
        ]
    }

    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    /// Pin `name` to a single value, replacing an existing axis of that name
    /// in place or appending a new one
    pub fn with_fixed(&self, name: &str, value: AxisValue) -> Self {
        let mut axes = self.axes.clone();
        match axes.iter_mut().find(|a| a.name == name) {
            Some(axis) => axis.values = vec![value],
            None => axes.push(Axis {
                name: name.to_string(),
                values: vec![value],
            }),
        }
        Self { axes }
    }

    /// Number of tuples the matrix expands to
    pub fn len(&self) -> usize {
        self.axes.iter().map(|a| a.values.len()).product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cartesian product of all axes. The first axis varies slowest.
    pub fn tuples(&self) -> Vec<ConfigurationTuple> {
        let mut product = vec![ConfigurationTuple::default()];
        for axis in &self.axes {
            let mut next = Vec::with_capacity(product.len() * axis.values.len());
            for prefix in &product {
                for value in &axis.values {
                    let mut tuple = prefix.clone();
                    tuple.entries.push((axis.name.clone(), value.clone()));
                    next.push(tuple);
                }
            }
            product = next;
        }
        product
    }

    /// Check every value of every axis against the per-axis mapping
    pub fn validate(&self) -> Result<(), ConfigError> {
        let probe_dir = Path::new(".");
        for axis in &self.axes {
            for value in &axis.values {
                axis_args(&axis.name, value, probe_dir)?;
            }
        }
        Ok(())
    }
}

impl Default for ConfigMatrix {
    fn default() -> Self {
        Self {
            axes: Self::default_axes(),
        }
    }
}

fn expect_bool(axis: &str, value: &AxisValue) -> Result<bool, ConfigError> {
    match value {
        AxisValue::Bool(b) => Ok(*b),
        other => Err(ConfigError::InvalidAxisValue {
            axis: axis.to_string(),
            value: other.to_string(),
            expected: "a boolean",
        }),
    }
}

fn expect_int(axis: &str, value: &AxisValue) -> Result<u64, ConfigError> {
    match value {
        AxisValue::Int(n) => Ok(*n),
        other => Err(ConfigError::InvalidAxisValue {
            axis: axis.to_string(),
            value: other.to_string(),
            expected: "a non-negative integer",
        }),
    }
}

fn expect_namemap(value: &AxisValue) -> Result<NameMapMode, ConfigError> {
    match value {
        AxisValue::Str(s) => s.parse(),
        other => Err(ConfigError::InvalidAxisValue {
            axis: AXIS_NAMEMAP.to_string(),
            value: other.to_string(),
            expected: "one of none, user, file, file_empty",
        }),
    }
}

/// Map one axis value onto sshfs options. Pure: only computes paths under `conf_dir`.
pub fn axis_args(
    axis: &str,
    value: &AxisValue,
    conf_dir: &Path,
) -> Result<Vec<String>, ConfigError> {
    let opt = |o: String| vec!["-o".to_string(), o];

    match axis {
        AXIS_DEBUG => Ok(if expect_bool(axis, value)? {
            opt("sshfs_debug".to_string())
        } else {
            Vec::new()
        }),
        AXIS_SYNC_RD => Ok(if expect_bool(axis, value)? {
            opt("sync_readdir".to_string())
        } else {
            Vec::new()
        }),
        AXIS_CACHE_TIMEOUT => match expect_int(axis, value)? {
            0 => Ok(opt("dir_cache=no".to_string())),
            timeout => {
                let mut args = opt(format!("dcache_timeout={}", timeout));
                args.extend(opt("dir_cache=yes".to_string()));
                Ok(args)
            }
        },
        AXIS_MULTICONN => Ok(if expect_bool(axis, value)? {
            opt(format!("max_conns={}", MULTICONN_MAX_CONNS))
        } else {
            Vec::new()
        }),
        AXIS_NAMEMAP => {
            let mode = expect_namemap(value)?;
            Ok(match mode {
                NameMapMode::None => Vec::new(),
                NameMapMode::User => opt("namemap=user".to_string()),
                NameMapMode::File | NameMapMode::FileEmpty => {
                    let uname = conf_dir.join(UNAME_FILE);
                    let gname = conf_dir.join(GNAME_FILE);
                    let mut args = opt("namemap=file".to_string());
                    args.extend(opt(format!("unamefile={}", uname.display())));
                    args.extend(opt(format!("gnamefile={}", gname.display())));
                    args
                }
            })
        }
        other => Err(ConfigError::UnknownAxis(other.to_string())),
    }
}

/// Typed view of a tuple, for the parts the harness itself needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServiceOptions {
    pub debug: bool,
    pub cache_timeout: u64,
    pub sync_rd: bool,
    pub multiconn: bool,
    pub namemap: NameMapMode,
}

impl TryFrom<&ConfigurationTuple> for ServiceOptions {
    type Error = ConfigError;

    fn try_from(tuple: &ConfigurationTuple) -> Result<Self, Self::Error> {
        let mut options = ServiceOptions::default();
        for (name, value) in tuple.entries() {
            match name.as_str() {
                AXIS_DEBUG => options.debug = expect_bool(name, value)?,
                AXIS_CACHE_TIMEOUT => options.cache_timeout = expect_int(name, value)?,
                AXIS_SYNC_RD => options.sync_rd = expect_bool(name, value)?,
                AXIS_MULTICONN => options.multiconn = expect_bool(name, value)?,
                AXIS_NAMEMAP => options.namemap = expect_namemap(value)?,
                other => return Err(ConfigError::UnknownAxis(other.to_string())),
            }
        }
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn tuple(entries: &[(&str, AxisValue)]) -> ConfigurationTuple {
        ConfigurationTuple {
            entries: entries
                .iter()
                .map(|(n, v)| (n.to_string(), v.clone()))
                .collect(),
        }
    }

    #[test]
    fn test_default_matrix_has_sixteen_tuples() {
        let matrix = ConfigMatrix::default();
        let tuples = matrix.tuples();
        assert_eq!(matrix.len(), 16);
        assert_eq!(tuples.len(), 16);

        let ids: std::collections::HashSet<_> = tuples.iter().map(|t| t.id()).collect();
        assert_eq!(ids.len(), 16, "tuple ids must be unique");
    }

    #[test]
    fn test_product_order_first_axis_slowest() {
        let matrix = ConfigMatrix::new(vec![
            Axis::new("debug", [false, true]),
            Axis::new("cache_timeout", [0u64, 1]),
        ])
        .unwrap();

        let ids: Vec<String> = matrix.tuples().iter().map(|t| t.id()).collect();
        assert_eq!(
            ids,
            vec![
                "debug=false-cache_timeout=0",
                "debug=false-cache_timeout=1",
                "debug=true-cache_timeout=0",
                "debug=true-cache_timeout=1",
            ]
        );
    }

    #[test]
    fn test_single_value_axis_participates() {
        let matrix = ConfigMatrix::new(vec![Axis::new("sync_rd", [true])]).unwrap();
        let tuples = matrix.tuples();
        assert_eq!(tuples.len(), 1);
        assert_eq!(tuples[0].get("sync_rd"), Some(&AxisValue::Bool(true)));
    }

    #[test]
    fn test_repeated_values_are_not_deduplicated() {
        let matrix = ConfigMatrix::new(vec![Axis::new("debug", [true, true])]).unwrap();
        assert_eq!(matrix.tuples().len(), 2);
    }

    #[test]
    fn test_duplicate_axis_rejected() {
        let result = ConfigMatrix::new(vec![
            Axis::new("debug", [true]),
            Axis::new("debug", [false]),
        ]);
        assert!(matches!(result, Err(ConfigError::DuplicateAxis(name)) if name == "debug"));
    }

    #[test]
    fn test_empty_axis_rejected() {
        let result = ConfigMatrix::new(vec![Axis::new::<bool>("debug", [])]);
        assert!(matches!(result, Err(ConfigError::EmptyAxis(_))));
    }

    #[test]
    fn test_with_fixed_replaces_or_appends() {
        let matrix = ConfigMatrix::default();
        let pinned = matrix.with_fixed(AXIS_NAMEMAP, "user".into());
        assert_eq!(pinned.len(), 16);
        assert_eq!(pinned.axes().last().unwrap().name, AXIS_NAMEMAP);

        let pinned = matrix.with_fixed(AXIS_DEBUG, true.into());
        assert_eq!(pinned.len(), 8);
        assert_eq!(pinned.axes()[0].values, vec![AxisValue::Bool(true)]);
    }

    #[test_case("debug", AxisValue::Bool(true), &["-o", "sshfs_debug"]; "debug on")]
    #[test_case("debug", AxisValue::Bool(false), &[]; "debug off")]
    #[test_case("sync_rd", AxisValue::Bool(true), &["-o", "sync_readdir"]; "sync readdir")]
    #[test_case("cache_timeout", AxisValue::Int(0), &["-o", "dir_cache=no"]; "no cache")]
    #[test_case(
        "cache_timeout",
        AxisValue::Int(1),
        &["-o", "dcache_timeout=1", "-o", "dir_cache=yes"];
        "cache one second"
    )]
    #[test_case("multiconn", AxisValue::Bool(true), &["-o", "max_conns=3"]; "multiconn")]
    #[test_case("namemap", AxisValue::Str("user".into()), &["-o", "namemap=user"]; "namemap user")]
    #[test_case("namemap", AxisValue::Str("none".into()), &[]; "namemap none")]
    fn test_axis_args(axis: &str, value: AxisValue, expected: &[&str]) {
        let args = axis_args(axis, &value, Path::new("/conf")).unwrap();
        assert_eq!(args, expected);
    }

    #[test]
    fn test_namemap_file_args_point_into_conf_dir() {
        for mode in ["file", "file_empty"] {
            let args = axis_args("namemap", &AxisValue::Str(mode.into()), Path::new("/conf"))
                .unwrap();
            assert_eq!(
                args,
                vec![
                    "-o",
                    "namemap=file",
                    "-o",
                    "unamefile=/conf/unamefile.txt",
                    "-o",
                    "gnamefile=/conf/gnamefile.txt",
                ]
            );
        }
    }

    #[test]
    fn test_unknown_axis_and_bad_values_are_errors() {
        let conf = Path::new("/conf");
        assert!(matches!(
            axis_args("compression", &AxisValue::Bool(true), conf),
            Err(ConfigError::UnknownAxis(_))
        ));
        assert!(matches!(
            axis_args("debug", &AxisValue::Int(1), conf),
            Err(ConfigError::InvalidAxisValue { .. })
        ));
        assert!(matches!(
            axis_args("namemap", &AxisValue::Str("ldap".into()), conf),
            Err(ConfigError::InvalidAxisValue { .. })
        ));

        let matrix = ConfigMatrix::new(vec![Axis::new("cache_timeout", ["fast"])]).unwrap();
        assert!(matrix.validate().is_err());
    }

    #[test]
    fn test_tuple_to_args_follows_axis_order() {
        let t = tuple(&[
            ("debug", true.into()),
            ("cache_timeout", 1u64.into()),
            ("sync_rd", false.into()),
            ("multiconn", true.into()),
        ]);
        let args = t.to_args(Path::new("/conf")).unwrap();
        assert_eq!(
            args,
            vec![
                "-o",
                "sshfs_debug",
                "-o",
                "dcache_timeout=1",
                "-o",
                "dir_cache=yes",
                "-o",
                "max_conns=3",
            ]
        );
    }

    #[test]
    fn test_service_options_from_tuple() {
        let t = tuple(&[
            ("cache_timeout", 1u64.into()),
            ("sync_rd", true.into()),
            ("namemap", "file_empty".into()),
        ]);
        let options = ServiceOptions::try_from(&t).unwrap();
        assert_eq!(options.cache_timeout, 1);
        assert!(options.sync_rd);
        assert!(!options.debug);
        assert_eq!(options.namemap, NameMapMode::FileEmpty);

        let bad = tuple(&[("turbo", true.into())]);
        assert!(ServiceOptions::try_from(&bad).is_err());
    }

    #[test]
    fn test_write_mapping_files() {
        let dir = tempfile::TempDir::new().unwrap();

        NameMapMode::File.write_mapping_files(dir.path()).unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("unamefile.txt")).unwrap(),
            "foo_user:root\n"
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("gnamefile.txt")).unwrap(),
            "bar_group:root\n"
        );

        NameMapMode::FileEmpty.write_mapping_files(dir.path()).unwrap();
        assert_eq!(
            std::fs::metadata(dir.path().join("unamefile.txt"))
                .unwrap()
                .len(),
            0
        );

        let empty = tempfile::TempDir::new().unwrap();
        NameMapMode::User.write_mapping_files(empty.path()).unwrap();
        assert_eq!(std::fs::read_dir(empty.path()).unwrap().count(), 0);
    }
}
