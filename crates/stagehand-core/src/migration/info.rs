use std::str::FromStr;

use crate::models::{CoreError, CoreErrorKind, invalid_input};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum MigrationKind {
    /// Declares the schema state a database already has; its statement never runs.
    Baseline,
    Migrate,
    /// Ad-hoc statement with no versioned artifact behind it.
    Sql,
}

impl MigrationKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::Migrate => "migrate",
            Self::Sql => "sql",
        }
    }
}

impl FromStr for MigrationKind {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "baseline" => Ok(Self::Baseline),
            "migrate" => Ok(Self::Migrate),
            "sql" => Ok(Self::Sql),
            other => Err(invalid_input(format!("unknown migration kind '{other}'"))),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MigrationInfo {
    pub kind: MigrationKind,
    pub version: String,
    pub description: String,
    pub creator: String,
}

impl MigrationInfo {
    pub fn ad_hoc(description: impl Into<String>) -> Self {
        Self {
            kind: MigrationKind::Sql,
            version: String::new(),
            description: description.into(),
            creator: String::new(),
        }
    }
}

/// Parses `<version>__<description>[__baseline|__migrate].sql`. Any leading
/// directories are ignored.
pub fn parse_migration_info(path: &str) -> Result<MigrationInfo, CoreError> {
    let filename = path.rsplit('/').next().unwrap_or(path);
    let stem = filename.strip_suffix(".sql").ok_or_else(|| {
        parse_failure(filename, "migration files must use the .sql extension")
    })?;

    let parts: Vec<&str> = stem.split("__").collect();
    let (version, description, kind) = match parts.as_slice() {
        [version, description] => (*version, *description, MigrationKind::Migrate),
        [version, description, "baseline"] => (*version, *description, MigrationKind::Baseline),
        [version, description, "migrate"] => (*version, *description, MigrationKind::Migrate),
        [_, _, other] => {
            return Err(parse_failure(
                filename,
                &format!("unknown migration type '{other}', expected baseline or migrate"),
            ));
        }
        _ => {
            return Err(parse_failure(
                filename,
                "expected <version>__<description>[__<type>].sql",
            ));
        }
    };

    if version.is_empty() || version.chars().any(char::is_whitespace) {
        return Err(parse_failure(
            filename,
            "version must be non-empty and contain no whitespace",
        ));
    }
    let description = description.replace('_', " ");
    if description.trim().is_empty() {
        return Err(parse_failure(filename, "description must not be empty"));
    }

    Ok(MigrationInfo {
        kind,
        version: version.to_string(),
        description,
        creator: String::new(),
    })
}

fn parse_failure(filename: &str, reason: &str) -> CoreError {
    CoreError::new(
        CoreErrorKind::ParseFailure,
        format!("invalid migration file name '{filename}': {reason}"),
    )
}
