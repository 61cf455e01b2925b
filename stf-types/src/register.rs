/// Register identifier as it appears on the wire. The STF format doesn't
/// distinguish integer/float/vector register classes at the type level; the
/// decoder adapter (`stf-decode`) is what interprets a raw id against the
/// architectural register file.
pub type RegisterId = u16;

/// `x0`, the RISC-V hardwired zero register. Writes to it are never true
/// producers (spec §3.2 invariant 9): the shadow register file and the
/// dependency trackers both special-case this id.
pub const REG_X0: RegisterId = 0;
