//! # Command Builder
//!
//! Purpose: Accumulate a command's argument vector before it is framed on
//! the wire.
//!
//! ## Design Principles
//! 1. **Non-Empty by Construction**: The constructor takes the command name,
//!    so an empty argv is unrepresentable.
//! 2. **Binary-Safe**: Arguments are raw byte strings; no text encoding is
//!    assumed anywhere in the builder.
//! 3. **Move on Handoff**: Sessions take commands by value, so a command in
//!    flight can no longer be mutated by the caller.
//!
//! Numbers are formatted through their `Display` impls, which in Rust are
//! locale-independent and round-trip exactly for integers.

/// An ordered sequence of byte-string arguments; `argv[0]` is the command
/// name. No validation beyond non-emptiness happens here, the server is the
/// source of truth for command correctness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    parts: Vec<Vec<u8>>,
}

impl Command {
    /// Starts a command from its name.
    pub fn new(name: impl AsRef<[u8]>) -> Self {
        Command {
            parts: vec![name.as_ref().to_vec()],
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl CommandArg) -> Self {
        arg.append_to(&mut self.parts);
        self
    }

    /// Appends every element of a sequence as its own argument.
    pub fn args<I>(mut self, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: CommandArg,
    {
        for arg in args {
            arg.append_to(&mut self.parts);
        }
        self
    }

    /// Number of arguments, including the command name.
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// Always false; a command carries at least its name.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// The raw argument vector.
    pub fn parts(&self) -> &[Vec<u8>] {
        &self.parts
    }
}

/// A value that can be appended to a command's argument vector.
pub trait CommandArg {
    fn append_to(self, parts: &mut Vec<Vec<u8>>);
}

impl CommandArg for &[u8] {
    fn append_to(self, parts: &mut Vec<Vec<u8>>) {
        parts.push(self.to_vec());
    }
}

impl<const N: usize> CommandArg for &[u8; N] {
    fn append_to(self, parts: &mut Vec<Vec<u8>>) {
        parts.push(self.to_vec());
    }
}

impl CommandArg for Vec<u8> {
    fn append_to(self, parts: &mut Vec<Vec<u8>>) {
        parts.push(self);
    }
}

impl CommandArg for &str {
    fn append_to(self, parts: &mut Vec<Vec<u8>>) {
        parts.push(self.as_bytes().to_vec());
    }
}

impl CommandArg for String {
    fn append_to(self, parts: &mut Vec<Vec<u8>>) {
        parts.push(self.into_bytes());
    }
}

macro_rules! display_command_arg {
    ($($ty:ty),*) => {
        $(impl CommandArg for $ty {
            fn append_to(self, parts: &mut Vec<Vec<u8>>) {
                parts.push(self.to_string().into_bytes());
            }
        })*
    };
}

display_command_arg!(i32, i64, u32, u64, usize, f64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_from_name_only() {
        let cmd = Command::new("PING");
        assert_eq!(cmd.len(), 1);
        assert_eq!(cmd.parts(), &[b"PING".to_vec()]);
    }

    #[test]
    fn appends_mixed_argument_types() {
        let cmd = Command::new("SET").arg("key").arg(b"value").arg(42i64);
        assert_eq!(
            cmd.parts(),
            &[
                b"SET".to_vec(),
                b"key".to_vec(),
                b"value".to_vec(),
                b"42".to_vec()
            ]
        );
    }

    #[test]
    fn appends_sequences_element_by_element() {
        let keys: Vec<&[u8]> = vec![b"a", b"b", b"c"];
        let cmd = Command::new("DEL").args(keys);
        assert_eq!(cmd.len(), 4);
        assert_eq!(cmd.parts()[3], b"c".to_vec());
    }

    #[test]
    fn formats_floats_canonically() {
        let cmd = Command::new("ZADD").arg("zs").arg(1.5f64).arg("member");
        assert_eq!(cmd.parts()[2], b"1.5".to_vec());
    }

    #[test]
    fn keeps_non_utf8_bytes_verbatim() {
        let raw: &[u8] = &[0x00, 0xff, 0xfe];
        let cmd = Command::new("SET").arg("bin").arg(raw);
        assert_eq!(cmd.parts()[2], vec![0x00, 0xff, 0xfe]);
    }
}
