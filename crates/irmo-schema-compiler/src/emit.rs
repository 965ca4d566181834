//! Output formatting, grounded in the original compiler's `write_c_array_file`
//! (`tools/interface-compiler.c`): 8 bytes per line, `0x%02x`, followed by a
//! companion `<name>_length` constant.

use std::fmt::Write as _;

pub fn c_array(name: &str, buf: &[u8]) -> String {
    let mut out = String::new();
    let _ = write!(out, "unsigned char {name}[] =\n{{");
    for (i, byte) in buf.iter().enumerate() {
        if i % 8 == 0 {
            out.push_str("\n\t");
        }
        let _ = write!(out, "0x{byte:02x}");
        if i != buf.len() - 1 {
            out.push_str(", ");
        }
    }
    out.push_str("\n};\n\n");
    let _ = write!(out, "unsigned int {name}_length = {};\n\n", buf.len());
    out
}

/// Default array name for an input file with no `-a` given: `interface_`
/// plus the basename with its extension stripped and every non-alphanumeric,
/// non-underscore character replaced with `_`.
pub fn default_array_name(input_path: &std::path::Path) -> String {
    let stem = input_path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = match stem.find('.') {
        Some(at) => stem[..at].to_owned(),
        None => stem,
    };
    let sanitized: String = stem
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    format!("interface_{sanitized}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn emits_eight_bytes_per_line_with_trailing_length() {
        let out = c_array("interface_foo", &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert!(out.starts_with("unsigned char interface_foo[] =\n{\n\t0x00, 0x01"));
        assert!(out.contains("\n\t0x08, 0x09"));
        assert!(out.contains("unsigned int interface_foo_length = 10;"));
    }

    #[test]
    fn default_name_strips_extension_and_sanitizes() {
        assert_eq!(default_array_name(Path::new("player-state.irmo")), "interface_player_state");
        assert_eq!(default_array_name(Path::new("/schemas/my.schema.txt")), "interface_my");
    }
}
