//! Credential File (`pgpass`)
//!
//! Lines have the form `host:port:dbname:user:password`. A literal `:` or `\` inside a field is
//! escaped with a backslash, lines starting with `#` are comments, and `*` in any of the first
//! four fields matches everything on lookup.
//!
//! # Locations
//! - POSIX: `~/.pgpass`
//! - Windows: `%APPDATA%\postgresql\pgpass.conf`
//! - `PGPASSFILE` or an explicit path overrides both
//!
//! # Permissions (POSIX)
//! A file readable by group or others is ignored for lookup. Writes set mode `0600` before
//! touching the file and `0400` afterwards.

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

use crate::error::{Result, WrdsError};

/// Environment variable overriding the credential file location
pub const PGPASSFILE_ENV: &str = "PGPASSFILE";

/// One credential file entry
#[derive(Clone, PartialEq, Eq)]
pub struct PgPassEntry {
    pub host: String,
    pub port: String,
    pub dbname: String,
    pub user: String,
    pub password: Zeroizing<String>,
}

impl PgPassEntry {
    pub fn new(
        host: impl Into<String>,
        port: impl ToString,
        dbname: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: port.to_string(),
            dbname: dbname.into(),
            user: user.into(),
            password: Zeroizing::new(password.into()),
        }
    }

    /// Serialized line, without a line ending
    #[must_use]
    pub fn to_line(&self) -> String {
        [
            self.host.as_str(),
            self.port.as_str(),
            self.dbname.as_str(),
            self.user.as_str(),
            self.password.as_str(),
        ]
        .iter()
        .map(|field| escape_field(field))
        .collect::<Vec<_>>()
        .join(":")
    }

    fn key(&self) -> [&str; 4] {
        [self.host.as_str(), self.port.as_str(), self.dbname.as_str(), self.user.as_str()]
    }
}

impl fmt::Debug for PgPassEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgPassEntry")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// Platform default location of the credential file
#[must_use]
pub fn default_path() -> Option<PathBuf> {
    if cfg!(windows) {
        dirs::data_dir().map(|appdata| appdata.join("postgresql").join("pgpass.conf"))
    } else {
        dirs::home_dir().map(|home| home.join(".pgpass"))
    }
}

/// Credential file to use: explicit path, then `PGPASSFILE`, then the platform default
#[must_use]
pub fn resolve_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    match std::env::var_os(PGPASSFILE_ENV) {
        Some(path) if !path.is_empty() => Some(PathBuf::from(path)),
        _ => default_path(),
    }
}

/// Backslash-escape `\` and `:`
#[must_use]
pub fn escape_field(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    for ch in field.chars() {
        if ch == '\\' || ch == ':' {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Split a line on unescaped `:` and unescape each field
#[must_use]
pub fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::with_capacity(5);
    let mut current = String::new();
    let mut chars = line.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some(escaped) => current.push(escaped),
                None => current.push('\\'),
            },
            ':' => fields.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    fields.push(current);
    fields
}

/// Parse one line; blank lines, comments and lines with fewer than five fields yield `None`
///
/// Anything after the fourth unescaped `:` belongs to the password.
#[must_use]
pub fn parse_line(line: &str) -> Option<PgPassEntry> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() || line.starts_with('#') {
        return None;
    }

    let mut fields = split_fields(line);
    if fields.len() < 5 {
        return None;
    }
    let password = fields.split_off(4).join(":");
    let mut fields = fields.into_iter();
    Some(PgPassEntry {
        host: fields.next()?,
        port: fields.next()?,
        dbname: fields.next()?,
        user: fields.next()?,
        password: Zeroizing::new(password),
    })
}

/// Find the password for a connection target in credential file text; first match wins
#[must_use]
pub fn find_password(
    contents: &str,
    host: &str,
    port: u16,
    dbname: &str,
    user: &str,
) -> Option<Zeroizing<String>> {
    let port = port.to_string();
    let wanted = [host, port.as_str(), dbname, user];
    contents.lines().filter_map(parse_line).find_map(|entry| {
        let matches = entry
            .key()
            .iter()
            .zip(wanted.iter())
            .all(|(pattern, value)| *pattern == "*" || pattern == value);
        matches.then(|| entry.password.clone())
    })
}

/// Look up a password in the credential file at `path`
///
/// A missing file is not an error. On POSIX a file readable by group or others is ignored.
pub fn lookup(
    path: &Path,
    host: &str,
    port: u16,
    dbname: &str,
    user: &str,
) -> Result<Option<Zeroizing<String>>> {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(WrdsError::credential_file(format!(
                "Could not inspect {}: {e}",
                path.display()
            )))
        }
    };

    if !metadata.is_file() {
        tracing::warn!(path = %path.display(), "credential file is not a plain file, ignoring");
        return Ok(None);
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o077 != 0 {
            tracing::warn!(
                path = %path.display(),
                "credential file is readable by group or others; use mode 0600 or stricter"
            );
            return Ok(None);
        }
    }

    let contents = Zeroizing::new(fs::read_to_string(path).map_err(|e| {
        WrdsError::credential_file(format!("Could not read {}: {e}", path.display()))
    })?);

    Ok(find_password(&contents, host, port, dbname, user))
}

/// Merge `entry` into credential file text
///
/// Every line whose first four fields equal the entry's key is replaced, keeping its original
/// line ending. If none matched, the entry is appended. All other lines are kept byte-for-byte.
#[must_use]
pub fn merge_entry(contents: &str, entry: &PgPassEntry) -> String {
    let new_line = entry.to_line();
    let mut out = String::with_capacity(contents.len() + new_line.len() + 1);
    let mut replaced = false;

    for line in contents.split_inclusive('\n') {
        let body = line.trim_end_matches(['\r', '\n']);
        let ending = &line[body.len()..];

        let same_key = !body.starts_with('#') && {
            let fields = split_fields(body);
            fields.len() >= 4 && fields[..4].iter().map(String::as_str).eq(entry.key())
        };

        if same_key {
            out.push_str(&new_line);
            out.push_str(ending);
            replaced = true;
        } else {
            out.push_str(line);
        }
    }

    if !replaced {
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&new_line);
        out.push('\n');
    }

    out
}

/// Write `entry` to the credential file at `path`, replacing any entry with the same key
///
/// No locking: concurrent writers race and the last one wins.
pub fn write_entry(path: &Path, entry: &PgPassEntry) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| {
            WrdsError::credential_file(format!("Could not create {}: {e}", parent.display()))
        })?;
    }

    let existing = match fs::read_to_string(path) {
        Ok(contents) => Some(Zeroizing::new(contents)),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => {
            return Err(WrdsError::credential_file(format!(
                "Could not read {}: {e}",
                path.display()
            )))
        }
    };

    if existing.is_some() {
        set_mode(path, 0o600)?;
    }

    let contents = existing.as_ref().map_or("", |c| c.as_str());
    let merged = Zeroizing::new(merge_entry(contents, entry));
    fs::write(path, merged.as_bytes()).map_err(|e| {
        WrdsError::credential_file(format!("Could not write {}: {e}", path.display()))
    })?;

    set_mode(path, 0o400)?;
    tracing::info!(
        path = %path.display(),
        host = %entry.host,
        user = %entry.user,
        "saved credentials"
    );
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| {
        WrdsError::credential_file(format!("Could not set permissions on {}: {e}", path.display()))
    })
}

#[cfg(not(unix))]
#[allow(clippy::unnecessary_wraps)]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(password: &str) -> PgPassEntry {
        PgPassEntry::new("wrds-pgdata.wharton.upenn.edu", 9737, "wrds", "jdoe", password)
    }

    #[test]
    fn test_escape_and_split_roundtrip() {
        let line = entry(r"a:b\c").to_line();
        assert_eq!(line, r"wrds-pgdata.wharton.upenn.edu:9737:wrds:jdoe:a\:b\\c");
        assert_eq!(split_fields(&line)[4], r"a:b\c");
    }

    #[test]
    fn test_parse_line_skips_comments_and_short_lines() {
        assert!(parse_line("# host:port:db:user:pw").is_none());
        assert!(parse_line("").is_none());
        assert!(parse_line("host:port:db:user").is_none());

        let parsed = parse_line("h:5432:db:u:pw:with:colons\r\n").unwrap();
        assert_eq!(parsed.host, "h");
        assert_eq!(parsed.password.as_str(), "pw:with:colons");
    }

    #[test]
    fn test_find_password_wildcards_and_order() {
        let contents = "\
# comment line
other.host:9737:wrds:jdoe:nope
*:9737:wrds:jdoe:first
wrds-pgdata.wharton.upenn.edu:9737:wrds:jdoe:second
";
        let pw = find_password(contents, "wrds-pgdata.wharton.upenn.edu", 9737, "wrds", "jdoe");
        assert_eq!(pw.as_deref().map(String::as_str), Some("first"));

        assert!(find_password(contents, "x", 5432, "wrds", "jdoe").is_none());
        assert!(find_password(contents, "x", 9737, "wrds", "someone").is_none());
    }

    #[test]
    fn test_merge_replaces_only_matching_line() {
        let contents = "\
# managed by hand\r
other.host:5432:db:alice:p\\:w\\\\d\r
wrds-pgdata.wharton.upenn.edu:9737:wrds:jdoe:old\r
*:*:*:bob:x";
        let merged = merge_entry(contents, &entry("new"));
        assert_eq!(
            merged,
            "\
# managed by hand\r
other.host:5432:db:alice:p\\:w\\\\d\r
wrds-pgdata.wharton.upenn.edu:9737:wrds:jdoe:new\r
*:*:*:bob:x"
        );
    }

    #[test]
    fn test_merge_appends_when_absent() {
        assert_eq!(
            merge_entry("", &entry("pw")),
            "wrds-pgdata.wharton.upenn.edu:9737:wrds:jdoe:pw\n"
        );
        assert_eq!(
            merge_entry("a:1:b:c:d", &entry("pw")),
            "a:1:b:c:d\nwrds-pgdata.wharton.upenn.edu:9737:wrds:jdoe:pw\n"
        );
    }

    #[test]
    fn test_write_entry_then_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("postgresql").join("pgpass.conf");

        write_entry(&path, &entry("first")).unwrap();
        write_entry(&path, &entry("second")).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "wrds-pgdata.wharton.upenn.edu:9737:wrds:jdoe:second\n");

        let pw = lookup(&path, "wrds-pgdata.wharton.upenn.edu", 9737, "wrds", "jdoe").unwrap();
        assert_eq!(pw.as_deref().map(String::as_str), Some("second"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o400);
        }
    }

    #[test]
    fn test_lookup_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let pw = lookup(&dir.path().join("absent"), "h", 1, "d", "u").unwrap();
        assert!(pw.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_lookup_ignores_world_readable_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".pgpass");
        fs::write(&path, "*:*:*:*:secret\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        assert!(lookup(&path, "h", 1, "d", "u").unwrap().is_none());

        fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).unwrap();
        let pw = lookup(&path, "h", 1, "d", "u").unwrap();
        assert_eq!(pw.as_deref().map(String::as_str), Some("secret"));
    }

    #[test]
    fn test_resolve_path_prefers_explicit() {
        let explicit = Path::new("/tmp/custom.pgpass");
        assert_eq!(resolve_path(Some(explicit)), Some(explicit.to_path_buf()));
    }
}
