//! The license record built by one validation call, and its flag sets.

use chrono::{DateTime, Utc};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use crate::errors::{LicenseError, LicenseResult};
use crate::keywords::FieldCode;

/// Licensing model. Set by whichever field group is seen first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Model {
    #[default]
    Unset,
    User,
    Server,
}

/// Refinement of [`Model`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LicenseType {
    #[default]
    Unset,
    /// Named user
    UUser,
    /// Node-locked
    UNode,
    /// Floating seats
    UFloat,
    /// Server, concurrent users
    SvrConc,
    /// Server, CPU count
    SvrCpu,
    /// Server, aggregate MHz
    SvrMhz,
    /// Server, named users
    SvrNmu,
}

impl LicenseType {
    pub fn model(self) -> Model {
        match self {
            LicenseType::Unset => Model::Unset,
            LicenseType::UUser | LicenseType::UNode | LicenseType::UFloat => Model::User,
            _ => Model::Server,
        }
    }

    pub(crate) fn for_server_field(code: FieldCode) -> LicenseType {
        match code {
            FieldCode::Cpu => LicenseType::SvrCpu,
            FieldCode::Mhz => LicenseType::SvrMhz,
            FieldCode::NamedUsers => LicenseType::SvrNmu,
            _ => LicenseType::SvrConc,
        }
    }
}

macro_rules! flag_set {
    ($(#[$meta:meta])* $name:ident { $($(#[$fmeta:meta])* $flag:ident = $bit:expr,)+ }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name(u32);

        impl $name {
            $($(#[$fmeta])* pub const $flag: $name = $name($bit);)+

            const NAMES: &'static [(&'static str, $name)] = &[$((stringify!($flag), $name::$flag),)+];

            pub const fn empty() -> Self {
                $name(0)
            }

            pub const fn bits(self) -> u32 {
                self.0
            }

            pub const fn from_bits_truncate(bits: u32) -> Self {
                $name(bits & ($($bit)|+))
            }

            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            pub const fn contains(self, other: $name) -> bool {
                self.0 & other.0 == other.0
            }

            pub fn insert(&mut self, other: $name) {
                self.0 |= other.0;
            }
        }

        impl BitOr for $name {
            type Output = $name;
            fn bitor(self, rhs: $name) -> $name {
                $name(self.0 | rhs.0)
            }
        }

        impl BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: $name) {
                self.0 |= rhs.0;
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let mut rest = self.0;
                let mut names: Vec<String> = Vec::new();
                for (name, flag) in Self::NAMES {
                    if self.contains(*flag) {
                        names.push((*name).to_string());
                        rest &= !flag.0;
                    }
                }
                if rest != 0 {
                    names.push(format!("{:#x}", rest));
                }
                write!(f, "{}({})", stringify!($name), names.join(" | "))
            }
        }
    };
}

flag_set! {
    /// Accumulated license modes. Purely additive during a parse.
    ModeFlags {
        TIME = 0x01,
        METERED = 0x02,
        OPTIONS = 0x04,
        CUSTOM_KEY = 0x08,
        CUSTOM_COOKIE = 0x10,
    }
}

flag_set! {
    /// Non-fatal conditions raised by a successful check.
    ///
    /// Bit values are part of the interface: callers that store or forward
    /// the raw bitmap read them through [`Warnings::bits`]. Bits above 0x20
    /// are free for a [`CustomKeyCheck`](crate::validator::CustomKeyCheck).
    Warnings {
        /// Expiration is within the warning window
        GRACE_EXPIRATION = 0x01,
        /// Remaining quota is at or below the caller's threshold
        NEAR_QUOTA = 0x02,
        /// Key is expired but inside its grace window
        GRACE_EXP_ACTIVE = 0x04,
        /// Usage is past the quota, within the allowed grace
        OVER_QUOTA = 0x08,
        /// Requested quota grace was cut to a quarter of the quota
        GRACE_QUOTA = 0x10,
        /// Requested expiration grace was cut to a quarter of the licensed span
        GRACE_EXP_TRUNCATED = 0x20,
    }
}

impl Warnings {
    /// Keep every bit, including ones without a name.
    pub const fn from_bits_retain(bits: u32) -> Self {
        Warnings(bits)
    }
}

/// Which identity a key is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// `usr=name` or `usr=name@host`
    User { user: String, host: Option<String> },
    Host(String),
    Network(String),
}

impl Binding {
    pub fn is_node(&self) -> bool {
        matches!(self, Binding::Host(_) | Binding::Network(_))
    }
}

/// Everything one validation call learned about a key.
///
/// Built fresh for each call and discarded on failure.
#[derive(Debug, Clone, Default)]
pub struct LicenseRecord {
    pub(crate) raw_key: String,
    pub(crate) model: Model,
    pub(crate) license_type: LicenseType,
    pub(crate) modes: ModeFlags,
    pub(crate) expiration: Option<DateTime<Utc>>,
    pub(crate) issued: Option<DateTime<Utc>>,
    pub(crate) custom_key: Option<String>,
    pub(crate) custom_cookie: Option<String>,
    pub(crate) binding: Option<Binding>,
    pub(crate) options: Option<String>,
    pub(crate) chained_key_id: Option<String>,
    pub(crate) quota: Option<i64>,
    pub(crate) usage_limit: Option<i64>,
    pub(crate) enforce: Option<bool>,
    pub(crate) app_password: Option<String>,
    pub(crate) product: Option<String>,
    pub(crate) checksum: Option<u64>,
    pub(crate) key_version: Option<u32>,
    pub(crate) privileged: bool,
    pub(crate) password_visible: bool,
}

/// Write `value` into an empty slot; a second write is a malformed key.
pub(crate) fn set_once<T>(slot: &mut Option<T>, value: T, code: FieldCode) -> LicenseResult<()> {
    if slot.is_some() {
        return Err(LicenseError::malformed(format!("duplicate '{code}' field")));
    }
    *slot = Some(value);
    Ok(())
}

impl LicenseRecord {
    pub(crate) fn new(raw_key: &str) -> Self {
        Self {
            raw_key: raw_key.to_string(),
            ..Self::default()
        }
    }

    /// The key text as handed to the validator.
    pub fn raw_key(&self) -> &str {
        &self.raw_key
    }

    pub fn model(&self) -> Model {
        self.model
    }

    pub fn license_type(&self) -> LicenseType {
        self.license_type
    }

    pub fn modes(&self) -> ModeFlags {
        self.modes
    }

    pub fn is_time_limited(&self) -> bool {
        self.modes.contains(ModeFlags::TIME)
    }

    pub fn is_metered(&self) -> bool {
        self.modes.contains(ModeFlags::METERED)
    }

    pub fn expiration(&self) -> Option<DateTime<Utc>> {
        self.expiration
    }

    /// Issue timestamp from the `ts` field.
    pub fn issued(&self) -> Option<DateTime<Utc>> {
        self.issued
    }

    /// Plaintext custom key (decrypted when the key is password protected).
    pub fn custom_key(&self) -> Option<&str> {
        self.custom_key.as_deref()
    }

    pub fn custom_cookie(&self) -> Option<&str> {
        self.custom_cookie.as_deref()
    }

    pub fn options(&self) -> Option<&str> {
        self.options.as_deref()
    }

    pub fn binding(&self) -> Option<&Binding> {
        self.binding.as_ref()
    }

    pub fn chained_key_id(&self) -> Option<&str> {
        self.chained_key_id.as_deref()
    }

    pub fn quota(&self) -> Option<i64> {
        self.quota
    }

    /// Seat limit of a floating or server key.
    pub fn usage_limit(&self) -> Option<i64> {
        self.usage_limit
    }

    pub fn is_enforced(&self) -> bool {
        self.enforce.unwrap_or(false)
    }

    /// The app password, only when the caller presented the master marker.
    pub fn app_password(&self) -> Option<&str> {
        if self.password_visible {
            self.app_password.as_deref()
        } else {
            None
        }
    }

    pub fn is_password_protected(&self) -> bool {
        self.app_password.is_some()
    }

    pub fn is_privileged(&self) -> bool {
        self.privileged
    }

    pub fn product(&self) -> Option<&str> {
        self.product.as_deref()
    }

    pub fn key_version(&self) -> Option<u32> {
        self.key_version
    }

    pub fn has_checksum(&self) -> bool {
        self.checksum.is_some()
    }

    /// Fill in model and type for keys that never fixed them.
    pub(crate) fn derive_model(&mut self) {
        if self.license_type == LicenseType::Unset {
            self.license_type = match &self.binding {
                Some(binding) if binding.is_node() => LicenseType::UNode,
                _ => LicenseType::UUser,
            };
        }
        if self.model == Model::Unset {
            self.model = self.license_type.model();
        }
    }
}
