//! Shell-command risk classification.
//!
//! A command is split on `&&`, `||`, `;`, and `|` into segments; each
//! segment is stripped of leading environment assignments and path
//! prefixes, and its base command classified. The highest level across
//! segments wins. Certain injection shapes and flags are refused outright
//! regardless of level.

use super::traits::RiskLevel;

/// Outcome of classifying one command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandAssessment {
    pub level: RiskLevel,
    pub blocked: bool,
    pub reason: Option<String>,
}

impl CommandAssessment {
    fn blocked(level: RiskLevel, reason: impl Into<String>) -> Self {
        Self {
            level,
            blocked: true,
            reason: Some(reason.into()),
        }
    }
}

const GREEN: &[&str] = &[
    "ls", "echo", "cat", "pwd", "whoami", "date", "which", "head", "tail", "wc",
    "printf", "true", "false", "uname", "hostname", "stat", "file", "du", "df",
    "env", "printenv", "uptime", "basename", "dirname",
];

const RED: &[&str] = &[
    "rm", "rmdir", "curl", "wget", "sudo", "su", "docker", "podman", "chmod",
    "chown", "kill", "pkill", "killall", "mount", "umount", "systemctl",
    "service", "shutdown", "reboot", "nc", "ssh", "scp", "ln",
];

/// Classify a full command line.
pub fn assess_command(command: &str) -> CommandAssessment {
    let trimmed = command.trim();
    if trimmed.is_empty() {
        return CommandAssessment {
            level: RiskLevel::Green,
            blocked: false,
            reason: None,
        };
    }

    // Substitution can smuggle arbitrary commands past segment analysis.
    if trimmed.contains("$(") {
        return CommandAssessment::blocked(RiskLevel::Critical, "command substitution $() is not permitted");
    }
    if trimmed.contains('`') {
        return CommandAssessment::blocked(RiskLevel::Critical, "backtick command substitution is not permitted");
    }
    for prefix in ["LD_PRELOAD=", "LD_LIBRARY_PATH=", "PATH="] {
        if trimmed.starts_with(prefix) {
            return CommandAssessment::blocked(
                RiskLevel::Critical,
                format!("loader environment injection ({prefix}…) is not permitted"),
            );
        }
    }
    // Classic fork bomb shape.
    if trimmed.contains(":(){") || trimmed.contains(":|:") {
        return CommandAssessment::blocked(RiskLevel::Critical, "fork bomb pattern");
    }

    let mut level = RiskLevel::Green;
    for segment in split_segments(trimmed) {
        let assessment = assess_segment(&segment);
        if assessment.blocked {
            return assessment;
        }
        level = level.max(assessment.level);
    }

    CommandAssessment {
        level,
        blocked: false,
        reason: None,
    }
}

/// Split on `&&`, `||`, `;`, `|` (checking two-character operators first).
fn split_segments(command: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let bytes: Vec<char> = command.chars().collect();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        let next = bytes.get(i + 1).copied();
        if (c == '&' && next == Some('&')) || (c == '|' && next == Some('|')) {
            segments.push(std::mem::take(&mut current));
            i += 2;
        } else if c == ';' || c == '|' {
            segments.push(std::mem::take(&mut current));
            i += 1;
        } else {
            current.push(c);
            i += 1;
        }
    }
    segments.push(current);
    segments.retain(|s| !s.trim().is_empty());
    segments
}

fn is_env_assignment(token: &str) -> bool {
    match token.split_once('=') {
        Some((name, _)) => {
            !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
                && !name.starts_with(|c: char| c.is_ascii_digit())
        }
        None => false,
    }
}

fn assess_segment(segment: &str) -> CommandAssessment {
    let tokens: Vec<&str> = segment.split_whitespace().collect();
    let mut iter = tokens.iter().copied().peekable();

    // Strip leading VAR=value assignments.
    while iter.peek().is_some_and(|t| is_env_assignment(t)) {
        iter.next();
    }
    let Some(first) = iter.next() else {
        return CommandAssessment {
            level: RiskLevel::Green,
            blocked: false,
            reason: None,
        };
    };
    // Strip path prefix: `/usr/bin/rm` classifies as `rm`.
    let base = first.rsplit('/').next().unwrap_or(first);
    let args: Vec<&str> = iter.collect();

    // Flag-based refusals on otherwise-tame bases.
    if base == "find" && args.iter().any(|a| *a == "-exec" || *a == "--exec") {
        return CommandAssessment::blocked(RiskLevel::Critical, "find -exec is not permitted");
    }
    if base == "git"
        && args
            .iter()
            .any(|a| a.starts_with("--upload-pack") || a.starts_with("--post-checkout"))
    {
        return CommandAssessment::blocked(RiskLevel::Critical, "git command-injection flag is not permitted");
    }

    // Critical shapes that need argument context.
    if base == "rm" {
        let recursive = args.iter().any(|a| {
            a.starts_with('-') && (a.contains('r') || a.contains('R')) && a.contains('f')
        });
        let root_target = args.iter().any(|a| *a == "/" || a.starts_with("/*"));
        if recursive && root_target {
            return CommandAssessment::blocked(RiskLevel::Critical, "rm -rf on the filesystem root");
        }
    }
    if base == "dd" && args.iter().any(|a| a.starts_with("if=")) {
        return CommandAssessment::blocked(RiskLevel::Critical, "raw dd reads/writes are not permitted");
    }
    if base.starts_with("mkfs") {
        return CommandAssessment::blocked(RiskLevel::Critical, "filesystem formatting is not permitted");
    }

    let level = if RED.contains(&base) {
        RiskLevel::Red
    } else if GREEN.contains(&base) {
        RiskLevel::Green
    } else {
        // git, npm, find, and anything unknown.
        RiskLevel::Yellow
    };

    CommandAssessment {
        level,
        blocked: false,
        reason: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn green_commands() {
        for cmd in ["ls -la", "echo hello", "cat README.md", "pwd"] {
            let a = assess_command(cmd);
            assert_eq!(a.level, RiskLevel::Green, "{cmd}");
            assert!(!a.blocked);
        }
    }

    #[test]
    fn yellow_commands_including_unknown() {
        for cmd in ["git status", "npm install", "find . -name foo", "some_custom_binary"] {
            assert_eq!(assess_command(cmd).level, RiskLevel::Yellow, "{cmd}");
        }
    }

    #[test]
    fn red_commands() {
        for cmd in ["rm file.txt", "curl https://example.com", "sudo apt update", "docker ps", "chmod +x run.sh"] {
            let a = assess_command(cmd);
            assert_eq!(a.level, RiskLevel::Red, "{cmd}");
            assert!(!a.blocked, "{cmd} is refusable only via policy");
        }
    }

    #[test]
    fn critical_rm_rf_root() {
        let a = assess_command("rm -rf /");
        assert_eq!(a.level, RiskLevel::Critical);
        assert!(a.blocked);
    }

    #[test]
    fn rm_rf_on_subdir_is_red_not_blocked() {
        let a = assess_command("rm -rf ./build");
        assert_eq!(a.level, RiskLevel::Red);
        assert!(!a.blocked);
    }

    #[test]
    fn critical_dd_and_mkfs() {
        assert!(assess_command("dd if=/dev/zero of=/dev/sda").blocked);
        assert!(assess_command("mkfs.ext4 /dev/sdb1").blocked);
    }

    #[test]
    fn fork_bomb_blocked() {
        assert!(assess_command(":(){ :|:& };:").blocked);
    }

    #[test]
    fn highest_segment_level_wins() {
        let a = assess_command("ls && rm old.log");
        assert_eq!(a.level, RiskLevel::Red);
        let b = assess_command("echo a; git log | head");
        assert_eq!(b.level, RiskLevel::Yellow);
    }

    #[test]
    fn any_critical_segment_blocks() {
        let a = assess_command("echo starting && rm -rf /");
        assert!(a.blocked);
        assert_eq!(a.level, RiskLevel::Critical);
    }

    #[test]
    fn substitution_refused() {
        assert!(assess_command("echo $(whoami)").blocked);
        assert!(assess_command("echo `id`").blocked);
    }

    #[test]
    fn loader_injection_refused() {
        assert!(assess_command("LD_PRELOAD=/tmp/evil.so ls").blocked);
        assert!(assess_command("PATH=/tmp ls").blocked);
    }

    #[test]
    fn env_assignment_and_path_prefix_stripped() {
        let a = assess_command("FOO=bar /usr/bin/rm file");
        assert_eq!(a.level, RiskLevel::Red);
    }

    #[test]
    fn find_exec_and_git_flags_refused() {
        assert!(assess_command("find . -exec rm {} \\;").blocked);
        assert!(assess_command("git fetch --upload-pack=/tmp/evil").blocked);
        // The same flags on an unrelated base are just tokens.
        assert!(!assess_command("echo --exec").blocked);
    }
}
