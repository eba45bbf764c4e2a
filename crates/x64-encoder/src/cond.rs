//! Condition codes.

/// An x86-64 condition code.
///
/// The discriminant is the second byte of the long-form `jcc` encoding
/// (`0F 8x`); the short-form opcode is `code - 0x10` and the `setcc` opcode
/// byte is `code + 0x10`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Cond {
    Equal = 0x84,
    NotEqual = 0x85,
    Less = 0x8C,
    GreaterEq = 0x8D,
    LessEq = 0x8E,
    Greater = 0x8F,
}

impl Cond {
    /// The `0F 8x` long-form jump opcode byte.
    pub fn long_code(self) -> u8 {
        self as u8
    }

    /// The `7x` short-form jump opcode byte.
    pub fn short_code(self) -> u8 {
        self as u8 - 0x10
    }

    /// The `0F 9x` setcc opcode byte.
    pub fn setcc_code(self) -> u8 {
        self as u8 + 0x10
    }

    /// The condition testing the opposite outcome.
    pub fn invert(self) -> Cond {
        match self {
            Cond::Equal => Cond::NotEqual,
            Cond::NotEqual => Cond::Equal,
            Cond::Less => Cond::GreaterEq,
            Cond::GreaterEq => Cond::Less,
            Cond::LessEq => Cond::Greater,
            Cond::Greater => Cond::LessEq,
        }
    }

    /// The condition with operand order mirrored (`a < b` ⇔ `b > a`).
    pub fn mirror(self) -> Cond {
        match self {
            Cond::Equal => Cond::Equal,
            Cond::NotEqual => Cond::NotEqual,
            Cond::Less => Cond::Greater,
            Cond::Greater => Cond::Less,
            Cond::LessEq => Cond::GreaterEq,
            Cond::GreaterEq => Cond::LessEq,
        }
    }
}
