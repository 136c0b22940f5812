//! Deterministic credentials for the pre-provisioned account pool.
//!
//! Every virtual user maps onto one of `pool_size` synthetic accounts. The
//! mapping is a plain modulo, so VU 0 and VU 500 log in as the same account
//! when the pool holds 500 entries.

use std::fmt;
use std::str::FromStr;

/// Number of synthetic accounts provisioned per role.
pub const POOL_SIZE: usize = 500;

/// Mail domain used by the provisioned accounts.
pub const DEFAULT_EMAIL_DOMAIN: &str = "st.futminna.edu.ng";

/// Account role. Each role has its own login prefix and shared password.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Staff,
    Student,
}

impl Role {
    /// Login prefix the accounts of this role were created with.
    pub fn login_prefix(&self) -> &'static str {
        match self {
            Role::Staff => "faculty",
            Role::Student => "student",
        }
    }

    /// Password shared by every account of this role.
    pub fn default_password(&self) -> &'static str {
        match self {
            Role::Staff => "staff123",
            Role::Student => "student123",
        }
    }

    pub fn default_login_format(&self) -> LoginFormat {
        match self {
            Role::Staff => LoginFormat::Username,
            Role::Student => LoginFormat::Email {
                domain: DEFAULT_EMAIL_DOMAIN.to_string(),
            },
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "staff" | "faculty" => Ok(Role::Staff),
            "student" => Ok(Role::Student),
            other => Err(format!(
                "Unknown role '{}'. Expected 'staff' or 'student'.",
                other
            )),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Staff => write!(f, "staff"),
            Role::Student => write!(f, "student"),
        }
    }
}

/// How the login identifier is rendered from the account number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginFormat {
    /// Bare username, e.g. `faculty7`.
    Username,
    /// Email address, e.g. `student7@st.futminna.edu.ng`.
    Email { domain: String },
}

/// Login identifier and password for one iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub login: String,
    pub password: String,
}

/// Credential generator for one role.
#[derive(Debug, Clone)]
pub struct CredentialPool {
    pub role: Role,
    pub format: LoginFormat,
    pub password: String,
    pub pool_size: usize,
}

impl CredentialPool {
    /// Pool of `POOL_SIZE` accounts using the role's default format and password.
    pub fn for_role(role: Role) -> Self {
        Self {
            role,
            format: role.default_login_format(),
            password: role.default_password().to_string(),
            pool_size: POOL_SIZE,
        }
    }

    /// Credentials for a 0-based virtual user index.
    pub fn credentials_for(&self, vu_index: u64) -> Credential {
        let number = account_index(vu_index, self.pool_size) + 1;
        let login = match &self.format {
            LoginFormat::Username => format!("{}{}", self.role.login_prefix(), number),
            LoginFormat::Email { domain } => {
                format!("{}{}@{}", self.role.login_prefix(), number, domain)
            }
        };

        Credential {
            login,
            password: self.password.clone(),
        }
    }
}

/// Maps a virtual user index onto the account pool.
///
/// `pool_size` must be non-zero; configuration loading rejects a zero pool.
pub fn account_index(vu_index: u64, pool_size: usize) -> usize {
    (vu_index % pool_size as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_index_wraps_at_pool_size() {
        assert_eq!(account_index(0, POOL_SIZE), 0);
        assert_eq!(account_index(499, POOL_SIZE), 499);
        assert_eq!(account_index(500, POOL_SIZE), 0);
        assert_eq!(account_index(1234, POOL_SIZE), 234);
    }

    #[test]
    fn account_index_is_periodic() {
        for i in [0u64, 1, 17, 250, 499, 9_999, 123_456] {
            assert_eq!(
                account_index(i, POOL_SIZE),
                account_index(i + POOL_SIZE as u64, POOL_SIZE),
                "index {} not periodic",
                i
            );
        }
    }

    #[test]
    fn staff_uses_bare_username() {
        let pool = CredentialPool::for_role(Role::Staff);
        let cred = pool.credentials_for(0);
        assert_eq!(cred.login, "faculty1");
        assert_eq!(cred.password, "staff123");

        assert_eq!(pool.credentials_for(499).login, "faculty500");
        assert_eq!(pool.credentials_for(500).login, "faculty1");
    }

    #[test]
    fn student_uses_email() {
        let pool = CredentialPool::for_role(Role::Student);
        let cred = pool.credentials_for(6);
        assert_eq!(cred.login, "student7@st.futminna.edu.ng");
        assert_eq!(cred.password, "student123");
    }

    #[test]
    fn staff_email_format() {
        let pool = CredentialPool {
            format: LoginFormat::Email {
                domain: "example.edu".to_string(),
            },
            ..CredentialPool::for_role(Role::Staff)
        };
        assert_eq!(pool.credentials_for(41).login, "faculty42@example.edu");
    }

    #[test]
    fn custom_pool_size() {
        let pool = CredentialPool {
            pool_size: 3,
            ..CredentialPool::for_role(Role::Staff)
        };
        let logins: Vec<String> = (0..6).map(|i| pool.credentials_for(i).login).collect();
        assert_eq!(
            logins,
            vec!["faculty1", "faculty2", "faculty3", "faculty1", "faculty2", "faculty3"]
        );
    }

    #[test]
    fn role_parsing() {
        assert_eq!("Staff".parse::<Role>().unwrap(), Role::Staff);
        assert_eq!("faculty".parse::<Role>().unwrap(), Role::Staff);
        assert_eq!("student".parse::<Role>().unwrap(), Role::Student);
        assert!("admin".parse::<Role>().is_err());
    }
}
