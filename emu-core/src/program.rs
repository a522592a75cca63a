use std::collections::{BTreeMap, HashMap};
use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProgramError {
    #[error("address {address:04x} is already occupied")]
    AddressOccupied { address: u16 },

    #[error("write runs past the end of the address space")]
    AddressOverflow,

    #[error("symbol '{name}' is already defined")]
    SymbolAlreadyDefined { name: String },

    #[error("alias '{name}' is already defined")]
    AliasAlreadyDefined { name: String },
}

/// A named location in the output program. `offset` stays `None` while the
/// symbol is only known from forward references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolInfo {
    pub name: String,
    pub offset: Option<u16>,
    pub imported: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocationMode {
    Absolute,
    Relative,
    ZeroPage,
}

impl RelocationMode {
    /// Placeholder byte count the relocation owns in the output.
    pub fn size(self) -> u16 {
        match self {
            RelocationMode::Absolute => 2,
            RelocationMode::Relative | RelocationMode::ZeroPage => 1,
        }
    }
}

impl fmt::Display for RelocationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RelocationMode::Absolute => "Absolute",
            RelocationMode::Relative => "Relative",
            RelocationMode::ZeroPage => "ZeroPage",
        };
        f.write_str(name)
    }
}

/// A placeholder in the emitted bytes whose final value depends on a
/// symbol's address. Symbols are referenced by name; the fix-up pass
/// resolves them once, after all input was seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelocationInfo {
    pub target_symbol: String,
    pub position: u16,
    pub mode: RelocationMode,
}

/// A named constant of one or two bytes. Aliases never relocate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueAlias {
    pub name: String,
    pub value: Vec<u8>,
}

/// Assembler output model: address -> byte, where writing the same address
/// twice requires an explicit overwrite (relocation fix-ups authorize it).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SparseBinaryCode {
    map: BTreeMap<u16, u8>,
}

impl SparseBinaryCode {
    pub fn new() -> SparseBinaryCode {
        SparseBinaryCode::default()
    }

    pub fn from_bytes(base_address: u16, bytes: &[u8]) -> SparseBinaryCode {
        let mut code = SparseBinaryCode::new();
        code.put_bytes(base_address, bytes, false)
            .expect("fresh sparse code cannot collide");
        code
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn get(&self, address: u16) -> Option<u8> {
        self.map.get(&address).copied()
    }

    pub fn put_byte(&mut self, address: u16, byte: u8, overwrite: bool) -> Result<(), ProgramError> {
        if !overwrite && self.map.contains_key(&address) {
            return Err(ProgramError::AddressOccupied { address });
        }
        self.map.insert(address, byte);
        Ok(())
    }

    pub fn put_bytes(
        &mut self,
        address: u16,
        bytes: &[u8],
        overwrite: bool,
    ) -> Result<(), ProgramError> {
        for (i, byte) in bytes.iter().enumerate() {
            let target = address as usize + i;
            if target > u16::MAX as usize {
                return Err(ProgramError::AddressOverflow);
            }
            self.put_byte(target as u16, *byte, overwrite)?;
        }
        Ok(())
    }

    /// Lowest and highest occupied address, or `None` for empty code.
    pub fn code_range(&self) -> Option<(u16, u16)> {
        let lo = self.map.keys().next()?;
        let hi = self.map.keys().next_back()?;
        Some((*lo, *hi))
    }

    /// 16 bytes per row, empty rows skipped.
    pub fn hex_dump(&self, line_prefix: &str) -> String {
        let mut out = String::new();
        let mut row: Option<u16> = None;
        let mut cells = [None::<u8>; 16];

        let mut flush = |row: u16, cells: &mut [Option<u8>; 16], out: &mut String| {
            out.push_str(line_prefix);
            out.push_str(&format!("{:04x} |", row << 4));
            for cell in cells.iter() {
                match cell {
                    Some(byte) => out.push_str(&format!(" {byte:02x}")),
                    None => out.push_str(" --"),
                }
            }
            out.push('\n');
            *cells = [None; 16];
        };

        for (address, byte) in &self.map {
            let this_row = address >> 4;
            if row != Some(this_row) {
                if let Some(previous) = row {
                    flush(previous, &mut cells, &mut out);
                }
                row = Some(this_row);
            }
            cells[(address & 0x0F) as usize] = Some(*byte);
        }
        if let Some(previous) = row {
            flush(previous, &mut cells, &mut out);
        }
        out
    }

    /// Materializes the full 65536-byte image; unoccupied bytes are zero.
    pub fn dump_memory(&self) -> Vec<u8> {
        let mut image = vec![0u8; 0x10000];
        for (address, byte) in &self.map {
            image[*address as usize] = *byte;
        }
        image
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, u8)> + '_ {
        self.map.iter().map(|(a, b)| (*a, *b))
    }
}

/// The assembler's complete output: sparse code plus the symbol, alias and
/// relocation tables. Symbol and alias names are disjoint namespaces.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    pub sparse_binary_code: SparseBinaryCode,
    pub symbols: HashMap<String, SymbolInfo>,
    pub aliases: HashMap<String, ValueAlias>,
    pub relocations: Vec<RelocationInfo>,
}

impl Program {
    pub fn new() -> Program {
        Program::default()
    }

    pub fn find_symbol(&self, name: &str) -> Option<&SymbolInfo> {
        self.symbols.get(name)
    }

    pub fn find_symbol_mut(&mut self, name: &str) -> Option<&mut SymbolInfo> {
        self.symbols.get_mut(name)
    }

    pub fn find_alias(&self, name: &str) -> Option<&ValueAlias> {
        self.aliases.get(name)
    }

    pub fn add_symbol(&mut self, symbol: SymbolInfo) -> Result<(), ProgramError> {
        if self.symbols.contains_key(&symbol.name) || self.aliases.contains_key(&symbol.name) {
            return Err(ProgramError::SymbolAlreadyDefined { name: symbol.name });
        }
        self.symbols.insert(symbol.name.clone(), symbol);
        Ok(())
    }

    pub fn add_alias(&mut self, alias: ValueAlias) -> Result<(), ProgramError> {
        if self.aliases.contains_key(&alias.name) || self.symbols.contains_key(&alias.name) {
            return Err(ProgramError::AliasAlreadyDefined { name: alias.name });
        }
        self.aliases.insert(alias.name.clone(), alias);
        Ok(())
    }

    /// Records a relocation, keeping the table ordered by position.
    pub fn add_relocation(&mut self, relocation: RelocationInfo) {
        let index = self
            .relocations
            .partition_point(|r| r.position <= relocation.position);
        self.relocations.insert(index, relocation);
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Program:")?;
        writeln!(f, "\tSymbols:")?;
        let mut symbols: Vec<_> = self.symbols.values().collect();
        symbols.sort_by(|a, b| a.name.cmp(&b.name));
        for symbol in symbols {
            writeln!(f, "\t\t{symbol:?}")?;
        }
        writeln!(f, "\tRelocations:")?;
        for relocation in &self.relocations {
            writeln!(
                f,
                "\t\t{{position:{:04x},mode:{},symbol:'{}'}}",
                relocation.position, relocation.mode, relocation.target_symbol
            )?;
        }
        writeln!(f, "\tAliases:")?;
        let mut aliases: Vec<_> = self.aliases.values().collect();
        aliases.sort_by(|a, b| a.name.cmp(&b.name));
        for alias in aliases {
            writeln!(f, "\t\t{alias:?}")?;
        }
        writeln!(f, "\tCode:")?;
        f.write_str(&self.sparse_binary_code.hex_dump("\t\t"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_write_without_overwrite_is_fatal() {
        let mut code = SparseBinaryCode::new();
        code.put_byte(0x100, 0xAA, false).unwrap();
        assert_eq!(
            code.put_byte(0x100, 0xBB, false),
            Err(ProgramError::AddressOccupied { address: 0x100 })
        );
        // Fix-ups are allowed to overwrite.
        code.put_byte(0x100, 0xBB, true).unwrap();
        assert_eq!(code.get(0x100), Some(0xBB));
    }

    #[test]
    fn put_bytes_checks_the_address_space_end() {
        let mut code = SparseBinaryCode::new();
        assert_eq!(
            code.put_bytes(0xFFFF, &[1, 2], false),
            Err(ProgramError::AddressOverflow)
        );
        code.put_bytes(0xFFFE, &[1, 2], false).unwrap();
    }

    #[test]
    fn code_range_tracks_extremes() {
        let mut code = SparseBinaryCode::new();
        assert_eq!(code.code_range(), None);
        code.put_byte(0x2000, 1, false).unwrap();
        code.put_byte(0x0010, 2, false).unwrap();
        code.put_byte(0xFFFA, 3, false).unwrap();
        assert_eq!(code.code_range(), Some((0x0010, 0xFFFA)));
    }

    #[test]
    fn hex_dump_skips_empty_rows() {
        let code = SparseBinaryCode::from_bytes(0x0000, &[0xA9, 0x44, 0x85, 0x10]);
        let mut far = code.clone();
        far.put_byte(0x0100, 0xEA, false).unwrap();
        let dump = far.hex_dump("");
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("0000 | a9 44 85 10"));
        assert!(lines[1].starts_with("0100 | ea"));
    }

    #[test]
    fn dump_memory_zero_fills_holes() {
        let code = SparseBinaryCode::from_bytes(0x0200, &[0xF0, 0xFE]);
        let image = code.dump_memory();
        assert_eq!(image.len(), 0x10000);
        assert_eq!(image[0x0200], 0xF0);
        assert_eq!(image[0x0201], 0xFE);
        assert_eq!(image[0x0202], 0x00);
        assert_eq!(image[0x0000], 0x00);
    }

    #[test]
    fn symbol_and_alias_namespaces_are_disjoint() {
        let mut program = Program::new();
        program
            .add_symbol(SymbolInfo {
                name: "LOOP".to_string(),
                offset: Some(0x200),
                imported: false,
            })
            .unwrap();
        assert!(program
            .add_alias(ValueAlias {
                name: "LOOP".to_string(),
                value: vec![1],
            })
            .is_err());
        program
            .add_alias(ValueAlias {
                name: "WIDTH".to_string(),
                value: vec![0x20],
            })
            .unwrap();
        assert!(program
            .add_symbol(SymbolInfo {
                name: "WIDTH".to_string(),
                offset: None,
                imported: true,
            })
            .is_err());
    }

    #[test]
    fn relocations_stay_ordered_by_position() {
        let mut program = Program::new();
        for position in [0x30u16, 0x10, 0x20] {
            program.add_relocation(RelocationInfo {
                target_symbol: "S".to_string(),
                position,
                mode: RelocationMode::Absolute,
            });
        }
        let positions: Vec<u16> = program.relocations.iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![0x10, 0x20, 0x30]);
    }
}
