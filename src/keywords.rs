//! Keyword table: field tags used in decoded key text.
//!
//! The table has 26 slots indexed by field code. Slots 0 and 25 are empty,
//! so a key can never reference them; codes 1..=24 are live.

/// Number of slots in the table, empty ones included.
pub const TABLE_SLOTS: usize = 26;

/// A live field code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum FieldCode {
    Expiration = 1,
    Cpu = 2,
    Mhz = 3,
    Concurrent = 4,
    NamedUsers = 5,
    Options = 6,
    User = 7,
    Host = 8,
    Network = 9,
    Quota = 10,
    Floating = 11,
    CustomKey = 12,
    CustomCookie = 13,
    Checksum = 14,
    KeyVersion = 15,
    AppPassword = 16,
    ExpirationTs = 17,
    ChainedKey = 18,
    /// Issuer annotation, ignored
    IssuedBy = 19,
    /// Issue-time annotation, ignored
    IssuedWhen = 20,
    IssueTs = 21,
    /// Customer annotation, ignored
    Customer = 22,
    Product = 23,
    Enforce = 24,
}

/// Code to tag. `None` marks an empty slot.
const KEYWORDS: [Option<&str>; TABLE_SLOTS] = [
    None,
    Some("exp"),
    Some("cpu"),
    Some("mhz"),
    Some("cnc"),
    Some("nmu"),
    Some("opt"),
    Some("usr"),
    Some("hst"),
    Some("net"),
    Some("qta"),
    Some("flt"),
    Some("cst"),
    Some("cooky"),
    Some("cksm"),
    Some("vsn"),
    Some("pwd"),
    Some("expts"),
    Some("chkid"),
    Some("who"),
    Some("when"),
    Some("ts"),
    Some("cust"),
    Some("prod"),
    Some("enf"),
    None,
];

const LIVE: [FieldCode; 24] = [
    FieldCode::Expiration,
    FieldCode::Cpu,
    FieldCode::Mhz,
    FieldCode::Concurrent,
    FieldCode::NamedUsers,
    FieldCode::Options,
    FieldCode::User,
    FieldCode::Host,
    FieldCode::Network,
    FieldCode::Quota,
    FieldCode::Floating,
    FieldCode::CustomKey,
    FieldCode::CustomCookie,
    FieldCode::Checksum,
    FieldCode::KeyVersion,
    FieldCode::AppPassword,
    FieldCode::ExpirationTs,
    FieldCode::ChainedKey,
    FieldCode::IssuedBy,
    FieldCode::IssuedWhen,
    FieldCode::IssueTs,
    FieldCode::Customer,
    FieldCode::Product,
    FieldCode::Enforce,
];

impl FieldCode {
    /// Numeric code, 1..=24.
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<FieldCode> {
        LIVE.get(usize::from(code).checked_sub(1)?).copied()
    }

    /// Resolve a textual tag. Lookup is exact and case-sensitive.
    pub fn from_tag(tag: &str) -> Option<FieldCode> {
        KEYWORDS
            .iter()
            .position(|kw| *kw == Some(tag))
            .and_then(|idx| u8::try_from(idx).ok())
            .and_then(FieldCode::from_code)
    }

    pub fn tag(self) -> &'static str {
        // Live codes always have a tag.
        KEYWORDS[usize::from(self.code())].unwrap_or("")
    }

    /// Seat-count fields of the server model.
    pub fn is_server_limit(self) -> bool {
        matches!(
            self,
            FieldCode::Concurrent | FieldCode::Cpu | FieldCode::Mhz | FieldCode::NamedUsers
        )
    }

    /// Annotation fields that are accepted and otherwise ignored.
    pub fn is_annotation(self) -> bool {
        matches!(
            self,
            FieldCode::IssuedBy | FieldCode::IssuedWhen | FieldCode::Customer
        )
    }

    pub fn all() -> &'static [FieldCode] {
        &LIVE
    }
}

impl std::fmt::Display for FieldCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}
