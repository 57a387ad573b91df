//! Event kinds understood by the ingestion core.

/// Start of the NIP-01 parameterized-replaceable range.
pub const PARAMETERIZED_REPLACEABLE_START: u16 = 30_000;
/// End (inclusive) of the NIP-01 parameterized-replaceable range.
pub const PARAMETERIZED_REPLACEABLE_END: u16 = 39_999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Metadata,
    Text,
    ContactList,
    Deletion,
    Repost,
    Reaction,
    Picture,
    Video,
    ShortVideo,
    Report,
    ZapRequest,
    ZapReceipt,
    MuteList,
    FollowSet,
    LongForm,
    /// Any other kind in 30000..=39999.
    Parameterized(u16),
    Unsupported(u16),
}

impl Kind {
    pub fn as_u16(self) -> u16 {
        match self {
            Kind::Metadata => 0,
            Kind::Text => 1,
            Kind::ContactList => 3,
            Kind::Deletion => 5,
            Kind::Repost => 6,
            Kind::Reaction => 7,
            Kind::Picture => 20,
            Kind::Video => 21,
            Kind::ShortVideo => 22,
            Kind::Report => 1984,
            Kind::ZapRequest => 9734,
            Kind::ZapReceipt => 9735,
            Kind::MuteList => 10_000,
            Kind::FollowSet => 30_000,
            Kind::LongForm => 30_023,
            Kind::Parameterized(k) | Kind::Unsupported(k) => k,
        }
    }

    /// Kinds where only the newest event per author survives.
    pub fn is_replaceable(self) -> bool {
        matches!(self, Kind::Metadata | Kind::ContactList | Kind::MuteList)
            || self.is_parameterized()
    }

    /// Kinds additionally scoped by a `d` tag.
    pub fn is_parameterized(self) -> bool {
        (PARAMETERIZED_REPLACEABLE_START..=PARAMETERIZED_REPLACEABLE_END).contains(&self.as_u16())
    }

    pub fn is_supported(self) -> bool {
        !matches!(self, Kind::Unsupported(_))
    }
}

impl From<u16> for Kind {
    fn from(kind: u16) -> Self {
        match kind {
            0 => Kind::Metadata,
            1 => Kind::Text,
            3 => Kind::ContactList,
            5 => Kind::Deletion,
            6 => Kind::Repost,
            7 => Kind::Reaction,
            20 => Kind::Picture,
            21 => Kind::Video,
            22 => Kind::ShortVideo,
            1984 => Kind::Report,
            9734 => Kind::ZapRequest,
            9735 => Kind::ZapReceipt,
            10_000 => Kind::MuteList,
            30_000 => Kind::FollowSet,
            30_023 => Kind::LongForm,
            k if (PARAMETERIZED_REPLACEABLE_START..=PARAMETERIZED_REPLACEABLE_END).contains(&k) => {
                Kind::Parameterized(k)
            }
            k => Kind::Unsupported(k),
        }
    }
}

impl From<Kind> for u16 {
    fn from(kind: Kind) -> Self {
        kind.as_u16()
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}
