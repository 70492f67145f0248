//! System account lookup.
//!
//! The daemon runs as root and needs each monitored user's numeric id
//! and home directory (for session buses and browser profile paths).
//! Accounts are read from the passwd database file.

use std::path::{Path, PathBuf};

/// One system account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub name: String,
    pub uid: u32,
    pub home: PathBuf,
}

/// Resolve an account by user name.
pub fn by_name(name: &str) -> Option<Account> {
    parse_file(Path::new("/etc/passwd"))
        .into_iter()
        .find(|a| a.name == name)
}

/// Resolve an account by numeric id.
pub fn by_uid(uid: u32) -> Option<Account> {
    parse_file(Path::new("/etc/passwd"))
        .into_iter()
        .find(|a| a.uid == uid)
}

fn parse_file(path: &Path) -> Vec<Account> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    parse_passwd(&content)
}

fn parse_passwd(content: &str) -> Vec<Account> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split(':');
            let name = fields.next()?;
            let _password = fields.next()?;
            let uid: u32 = fields.next()?.parse().ok()?;
            let _gid = fields.next()?;
            let _gecos = fields.next()?;
            let home = fields.next()?;
            Some(Account {
                name: name.to_string(),
                uid,
                home: PathBuf::from(home),
            })
        })
        .collect()
}

/// Session bus socket path for a user, per the freedesktop layout.
pub fn session_bus_path(uid: u32) -> PathBuf {
    PathBuf::from(format!("/run/user/{uid}/bus"))
}

/// `DBUS_SESSION_BUS_ADDRESS` value for a user.
pub fn session_bus_address(uid: u32) -> String {
    format!("unix:path=/run/user/{uid}/bus")
}
