//! Shared helpers for quoting and log redaction.

use std::borrow::Cow;

/// Key fragments whose values are masked before a command is logged.
const SENSITIVE_KEYS: &[&str] = &["password", "passwd", "sshpass", "secret", "token", "key_passphrase"];

fn find_value_end(s: &str) -> usize {
    let mut end = 0;
    let mut in_quote = None;
    let mut escaped = false;

    for c in s.chars() {
        let char_len = c.len_utf8();

        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if let Some(q) = in_quote {
            if c == q {
                in_quote = None;
            }
        } else if c == '"' || c == '\'' {
            in_quote = Some(c);
        } else if c.is_whitespace() {
            break;
        }

        end += char_len;
    }
    end
}

fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SENSITIVE_KEYS.iter().any(|k| lower.ends_with(k))
}

/// Mask secret values in a command string before logging.
///
/// Covers `KEY=value` assignments (env vars and model `-o key=value`
/// properties) and `--password value` style flags whose key names a
/// credential.
pub fn mask_sensitive_command(cmd: &str) -> String {
    let mut result = String::with_capacity(cmd.len());
    let mut rest = cmd;
    let mut mask_next_word = false;

    while !rest.is_empty() {
        let ws = rest.len() - rest.trim_start().len();
        result.push_str(&rest[..ws]);
        rest = &rest[ws..];
        if rest.is_empty() {
            break;
        }

        let word_end = find_value_end(rest);
        let word = &rest[..word_end];

        if mask_next_word {
            result.push_str("***");
            mask_next_word = false;
        } else if let Some(flag) = word.strip_prefix("--") {
            match flag.split_once('=') {
                Some((key, _)) if is_sensitive_key(key) => {
                    result.push_str("--");
                    result.push_str(key);
                    result.push_str("=***");
                }
                Some(_) => result.push_str(word),
                None => {
                    mask_next_word = is_sensitive_key(flag);
                    result.push_str(word);
                }
            }
        } else {
            match word.split_once('=') {
                Some((key, _)) if is_sensitive_key(key.trim_matches(['"', '\''])) => {
                    result.push_str(key);
                    result.push_str("=***");
                }
                _ => result.push_str(word),
            }
        }

        rest = &rest[word_end..];
    }

    result
}

/// Replace every occurrence of a known secret with `***`.
pub fn redact_literal(text: &str, secret: &str) -> String {
    if secret.is_empty() {
        return text.to_string();
    }
    text.replace(secret, "***")
}

/// Quote a single word for a POSIX shell.
pub fn shell_quote(word: &str) -> Cow<'_, str> {
    shell_escape::unix::escape(Cow::Borrowed(word))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_model_property_password() {
        let cmd = "litp create -p /deployments/d1/users/u1 -t user -o name=u1 password=S3cr3t";
        let masked = mask_sensitive_command(cmd);
        assert!(masked.contains("password=***"));
        assert!(masked.contains("name=u1"));
        assert!(!masked.contains("S3cr3t"));
    }

    #[test]
    fn test_mask_sshpass_env_and_flags() {
        let cmd = "SSHPASS=hunter2 sshpass -e ssh host --password abc --token=xyz";
        let masked = mask_sensitive_command(cmd);
        assert_eq!(masked, "SSHPASS=*** sshpass -e ssh host --password *** --token=***");
    }

    #[test]
    fn test_mask_quoted_value() {
        let cmd = "litp update -p /x -o root_password='my super secret' -d other";
        let masked = mask_sensitive_command(cmd);
        assert_eq!(masked, "litp update -p /x -o root_password=*** -d other");
    }

    #[test]
    fn test_mask_leaves_plain_commands_alone() {
        let cmd = "litp show_plan -a";
        assert_eq!(mask_sensitive_command(cmd), cmd);
    }

    #[test]
    fn test_redact_literal() {
        assert_eq!(redact_literal("login as bob/pw123", "pw123"), "login as bob/***");
        assert_eq!(redact_literal("nothing", ""), "nothing");
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("plain"), "plain");
        assert_eq!(shell_quote("has space"), "'has space'");
    }
}
