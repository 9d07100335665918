//! Wire format for downstream control packets.
//!
//! The real UECS-CCM XML framing is out of scope for this core (`spec.md`
//! §1); [`PacketCodec`] isolates the wire format behind a trait so a real
//! XML codec can be swapped in later without touching [`crate::BusAdapter`]
//! or anything in `greenhouse_core` — the same separation the teacher draws
//! between a HAL driver's trait surface and its concrete driver
//! implementation (`evo_hal::drivers::mod` -> `drivers::simulation`).

/// Encodes a single logical `(type, value, priority)` command into bytes
/// suitable for one UDP datagram.
pub trait PacketCodec: Send + Sync {
    /// `actuator_type` already carries any source-tag suffix (see
    /// [`SourceTag`]); the codec only frames the three fields.
    fn encode(&self, actuator_type: &str, value: u8, priority: u8) -> Vec<u8>;
}

/// Minimal `key=value` line codec used until a real UECS-CCM XML codec is
/// wired in. One packet per line, newline-terminated.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineCodec;

impl PacketCodec for LineCodec {
    fn encode(&self, actuator_type: &str, value: u8, priority: u8) -> Vec<u8> {
        format!("type={actuator_type}&value={value}&priority={priority}\n").into_bytes()
    }
}

/// Per-level choice of type suffix appended to the actuator id on the wire.
///
/// `spec.md` §6: `type` is the actuator id "optionally suffixed `rcA` for
/// automatic-source or `rcM` for manual-source — the choice is per-level".
/// §9's open questions flag the exact mapping as unresolved pending field
/// testing, so it is kept parameterisable rather than hard-coded into the
/// codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceTag {
    /// No suffix — the shortest form, used by L1 emergency commands.
    Bare,
    /// `rcA` — automatic-source commands.
    Auto,
    /// `rcM` — manual-source commands.
    Manual,
}

impl SourceTag {
    /// The literal suffix text (empty for `Bare`).
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Bare => "",
            Self::Auto => "rcA",
            Self::Manual => "rcM",
        }
    }

    /// Apply this tag's suffix to a bare actuator id.
    pub fn apply(self, actuator_id: &str) -> String {
        format!("{actuator_id}{}", self.suffix())
    }
}

/// The current best hypothesis for level -> [`SourceTag`] (`spec.md` §6):
/// L1 bare, L3 `rcM`, everything else (L2, L4, L5) `rcA`.
pub const fn default_source_tag(level: u8) -> SourceTag {
    match level {
        1 => SourceTag::Bare,
        3 => SourceTag::Manual,
        _ => SourceTag::Auto,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_codec_frames_three_fields() {
        let codec = LineCodec;
        let bytes = codec.encode("VenSdWinrcM", 1, 10);
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            "type=VenSdWinrcM&value=1&priority=10\n"
        );
    }

    #[test]
    fn source_tag_mapping_matches_spec_hypothesis() {
        assert_eq!(default_source_tag(1), SourceTag::Bare);
        assert_eq!(default_source_tag(2), SourceTag::Auto);
        assert_eq!(default_source_tag(3), SourceTag::Manual);
        assert_eq!(default_source_tag(4), SourceTag::Auto);
        assert_eq!(default_source_tag(5), SourceTag::Auto);
    }

    #[test]
    fn apply_suffixes_bare_tag_with_nothing() {
        assert_eq!(SourceTag::Bare.apply("Irri"), "Irri");
        assert_eq!(SourceTag::Auto.apply("Irri"), "IrrircA");
        assert_eq!(SourceTag::Manual.apply("Irri"), "IrrircM");
    }
}
