// Built-in ISA descriptions, compiled into the binary.

pub const ZX16: &str = include_str!("zx16.json");

/// Every built-in description as (name, json) pairs.
pub fn all() -> &'static [(&'static str, &'static str)] {
    &[("zx16", ZX16)]
}

#[cfg(test)]
mod tests {
    use crate::isa::IsaSpec;

    #[test]
    fn test_all_builtins_validate() {
        for (name, json) in super::all() {
            let spec = IsaSpec::from_json(json)
                .unwrap_or_else(|e| panic!("builtin {} failed to load: {}", name, e));
            assert!(spec.name.eq_ignore_ascii_case(name));
        }
    }

    #[test]
    fn test_zx16_shape() {
        let spec = IsaSpec::from_json(super::ZX16).unwrap();
        assert_eq!(spec.instruction_size, 16);
        assert_eq!(spec.register_count(), 8);
        assert_eq!(spec.register_field_width(), 3);
        assert_eq!(spec.memory_layout.code_section.start, 0x20);

        let li = spec.lookup_instruction("LI").unwrap();
        let imm = li.field("imm").unwrap();
        assert_eq!((imm.high, imm.low), (15, 9));
        assert!(imm.signed);

        // aliases share the register namespace
        let (idx, reg) = spec.lookup_register("ra").unwrap();
        assert_eq!(idx, 1);
        assert_eq!(reg.name, "x1");
    }
}
