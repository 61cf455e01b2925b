use bitflags::bitflags;

bitflags! {
    /// `TRACE_INFO_FEATURE` bitmap (spec §6.2). Drives which optional
    /// records are legal and required; honesty of this bitmap against the
    /// actual record stream is a validator-only invariant (spec §3.2 #6),
    /// never enforced by the codec itself.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct FeatureBitmap: u64 {
        const PHYSICAL_ADDRESS_PRESENT   = 0x0000_0001;
        const DATA_ATTRIBUTE_PRESENT     = 0x0000_0002;
        const OPERAND_VALUE_PRESENT      = 0x0000_0004;
        const EVENT_PRESENT              = 0x0000_0008;
        const SYSCALL_VALUE_PRESENT      = 0x0000_0010;
        const INT_DIV_OPERAND_VALUE_PRESENT = 0x0000_0040;
        const SAMPLING                   = 0x0000_0080;
        const PTE_EMBEDDED                = 0x0000_0100;
        const SIMPOINT                    = 0x0000_0200;
        const PROCESS_ID_PRESENT          = 0x0000_0400;
        const PTE_ONLY                    = 0x0000_0800;
        const NEEDS_POSTPROCESS           = 0x0000_1000;
        const REG_STATE_PRESENT           = 0x0000_2000;
        const MICROOP                     = 0x0000_4000;
        const MULTI_THREAD                = 0x0000_8000;
        const MULTI_CORE                  = 0x0001_0000;
        const VEC                         = 0x0004_0000;
        const EVENT64                     = 0x0008_0000;
        const TRANSACTIONS                = 0x0010_0000;
        const RV64                        = 0x0020_0000;
    }
}

impl FeatureBitmap {
    /// Bits a rewriter is allowed to clear via `disable_feature` (spec §4.3
    /// "Header copy"). Structural bits that describe the trace's shape
    /// rather than an optional-record toggle (`PTE_ONLY`, `SAMPLING`,
    /// `SIMPOINT`, `MULTI_THREAD`/`MULTI_CORE`, `RV64`) are not toggleable:
    /// clearing them would misdescribe instructions already emitted.
    pub const TOGGLEABLE: FeatureBitmap = FeatureBitmap::from_bits_truncate(
        Self::PHYSICAL_ADDRESS_PRESENT.bits()
            | Self::DATA_ATTRIBUTE_PRESENT.bits()
            | Self::OPERAND_VALUE_PRESENT.bits()
            | Self::EVENT_PRESENT.bits()
            | Self::SYSCALL_VALUE_PRESENT.bits()
            | Self::INT_DIV_OPERAND_VALUE_PRESENT.bits()
            | Self::PTE_EMBEDDED.bits()
            | Self::PROCESS_ID_PRESENT.bits()
            | Self::NEEDS_POSTPROCESS.bits()
            | Self::REG_STATE_PRESENT.bits()
            | Self::MICROOP.bits(),
    );

    /// Whether `disable_feature` is legal for `bit` right now: it must be
    /// one of the toggleable bits, and (per spec §6.2) the caller is
    /// responsible for ensuring no record requiring it will be emitted
    /// downstream; this only checks the static toggleability.
    pub fn can_disable(self, bit: FeatureBitmap) -> bool {
        Self::TOGGLEABLE.contains(bit)
    }
}
