//! Command-line and environment-block encoding for `CreateProcessW`.

use std::iter::repeat_n;
use std::path::Path;

/// Append `arg` to `out` quoted so that the MSVC runtime parses it back verbatim
pub fn quote_argument(arg: &str, out: &mut String) {
    let needs_quotes =
        arg.is_empty() || arg.contains([' ', '\t', '\n', '\x0b', '"']);
    if !needs_quotes {
        out.push_str(arg);
        return;
    }

    out.push('"');
    let mut backslashes = 0usize;
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                // every backslash before a quote is doubled, plus one for the quote
                out.extend(repeat_n('\\', backslashes * 2 + 1));
                out.push('"');
                backslashes = 0;
            }
            _ => {
                out.extend(repeat_n('\\', backslashes));
                out.push(c);
                backslashes = 0;
            }
        }
    }
    // backslashes before the closing quote are doubled
    out.extend(repeat_n('\\', backslashes * 2));
    out.push('"');
}

/// Full command line: quoted executable followed by quoted arguments
pub fn build_command_line(executable: &Path, args: &[String]) -> String {
    let mut line = String::new();
    let exe = executable.to_string_lossy();
    // the program name is not parsed with backslash rules, only quoted
    if exe.contains([' ', '\t']) {
        line.push('"');
        line.push_str(&exe);
        line.push('"');
    } else {
        line.push_str(&exe);
    }

    for arg in args {
        line.push(' ');
        quote_argument(arg, &mut line);
    }
    line
}

/// UTF-16 `KEY=VALUE\0...\0\0` block. `CreateProcessW` expects the
/// variables sorted by name, ignoring case.
pub fn environment_block(env: &[(String, String)]) -> Vec<u16> {
    let mut sorted: Vec<&(String, String)> = env.iter().collect();
    sorted.sort_by_cached_key(|(key, _)| key.to_uppercase());

    let mut block = Vec::new();
    for (key, value) in sorted {
        block.extend(key.encode_utf16());
        block.push(u16::from(b'='));
        block.extend(value.encode_utf16());
        block.push(0);
    }
    if env.is_empty() {
        block.push(0);
    }
    block.push(0);
    block
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quoted(arg: &str) -> String {
        let mut out = String::new();
        quote_argument(arg, &mut out);
        out
    }

    #[test]
    fn test_plain_arguments_are_untouched() {
        assert_eq!(quoted("/nologo"), "/nologo");
        assert_eq!(quoted(r"C:\src\main.cpp"), r"C:\src\main.cpp");
    }

    #[test]
    fn test_spaces_and_empty_are_quoted() {
        assert_eq!(quoted(""), "\"\"");
        assert_eq!(quoted("Program Files"), "\"Program Files\"");
    }

    #[test]
    fn test_quotes_and_backslashes() {
        assert_eq!(quoted(r#"say "hi""#), r#""say \"hi\"""#);
        assert_eq!(quoted(r"C:\Program Files\"), r#""C:\Program Files\\""#);
        assert_eq!(quoted(r#"a\"b"#), r#""a\\\"b""#);
    }

    #[test]
    fn test_command_line() {
        let line = build_command_line(
            Path::new(r"C:\Program Files\LLVM\bin\clang-cl.exe"),
            &["/c".to_string(), "my file.cpp".to_string()],
        );
        assert_eq!(
            line,
            r#""C:\Program Files\LLVM\bin\clang-cl.exe" /c "my file.cpp""#
        );
        assert_eq!(build_command_line(Path::new("cl.exe"), &[]), "cl.exe");
    }

    #[test]
    fn test_environment_block() {
        let block = environment_block(&[
            ("PATH".to_string(), "C:\\bin".to_string()),
            ("TMP".to_string(), "x".to_string()),
        ]);
        let text = String::from_utf16(&block).unwrap();
        assert_eq!(text, "PATH=C:\\bin\0TMP=x\0\0");

        assert_eq!(environment_block(&[]), vec![0, 0]);
    }

    #[test]
    fn test_environment_block_is_sorted_ignoring_case() {
        let block = environment_block(&[
            ("TMP".to_string(), "x".to_string()),
            ("Path".to_string(), "C:\\bin".to_string()),
            ("ALLUSERSPROFILE".to_string(), "C:\\ProgramData".to_string()),
            ("include".to_string(), "C:\\sdk".to_string()),
        ]);
        let text = String::from_utf16(&block).unwrap();
        assert_eq!(
            text,
            "ALLUSERSPROFILE=C:\\ProgramData\0include=C:\\sdk\0Path=C:\\bin\0TMP=x\0\0"
        );
    }
}
