//! User-facing message catalogue (en/zh).
//!
//! Every string a repository user can see in a comment goes through here.
//! Log lines and internal envelopes stay English.

/// UI locale, resolved once from `MR_AGENT_LOCALE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Locale {
    #[default]
    En,
    Zh,
}

impl Locale {
    pub fn from_env() -> Self {
        match std::env::var("MR_AGENT_LOCALE")
            .unwrap_or_default()
            .to_ascii_lowercase()
            .as_str()
        {
            "zh" | "zh-cn" | "zh_cn" => Locale::Zh,
            _ => Locale::En,
        }
    }
}

pub fn title_required(locale: Locale) -> String {
    match locale {
        Locale::En => "Issue title is required".to_string(),
        Locale::Zh => "必须填写标题".to_string(),
    }
}

pub fn body_too_short(locale: Locale, min: u32) -> String {
    match locale {
        Locale::En => format!("Description must be at least {min} characters long"),
        Locale::Zh => format!("描述内容不能少于 {min} 个字符"),
    }
}

pub fn missing_section(locale: Locale, name: &str) -> String {
    match locale {
        Locale::En => format!("Missing or empty template section: {name}"),
        Locale::Zh => format!("模板章节缺失或为空：{name}"),
    }
}

pub fn missing_issue_reference(locale: Locale) -> String {
    match locale {
        Locale::En => "Pull request description must reference an issue".to_string(),
        Locale::Zh => "PR 描述必须关联一个 issue".to_string(),
    }
}

pub fn command_too_frequent(locale: Locale) -> String {
    match locale {
        Locale::En => {
            "Command triggered too frequently; please wait a moment and try again.".to_string()
        }
        Locale::Zh => "命令触发过于频繁，请稍后再试。".to_string(),
    }
}

pub fn command_disabled(locale: Locale, command: &str) -> String {
    match locale {
        Locale::En => format!("The `{command}` command is disabled by repository policy."),
        Locale::Zh => format!("仓库策略已禁用 `{command}` 命令。"),
    }
}

pub fn already_executed(locale: Locale) -> String {
    match locale {
        Locale::En => {
            "This request was already executed recently; skipping the duplicate run.".to_string()
        }
        Locale::Zh => "该请求最近已执行过，跳过重复运行。".to_string(),
    }
}

pub fn review_failed(locale: Locale, reason: &str) -> String {
    match locale {
        Locale::En => format!("Automated review failed: {reason}"),
        Locale::Zh => format!("自动评审失败：{reason}"),
    }
}

pub fn no_reviewable_changes(locale: Locale) -> String {
    match locale {
        Locale::En => "No reviewable changes found in this update.".to_string(),
        Locale::Zh => "本次更新没有可评审的变更。".to_string(),
    }
}

pub fn feedback_recorded(locale: Locale) -> String {
    match locale {
        Locale::En => "Feedback recorded, thank you.".to_string(),
        Locale::Zh => "反馈已记录，谢谢。".to_string(),
    }
}

pub fn files_truncated_warning(locale: Locale) -> String {
    match locale {
        Locale::En => {
            "Note: the file list was truncated by the forge API; the review covers a subset of the change.".to_string()
        }
        Locale::Zh => "注意：平台 API 截断了文件列表，本次评审仅覆盖部分变更。".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_messages_match_the_published_contract() {
        assert_eq!(title_required(Locale::En), "Issue title is required");
        assert_eq!(
            missing_section(Locale::En, "Summary"),
            "Missing or empty template section: Summary"
        );
        assert!(command_too_frequent(Locale::En).starts_with("Command triggered too frequently"));
    }

    #[test]
    fn zh_catalogue_is_complete_for_gate_messages() {
        assert!(!title_required(Locale::Zh).is_empty());
        assert!(!command_too_frequent(Locale::Zh).is_empty());
        assert!(!command_disabled(Locale::Zh, "/ask").is_empty());
    }
}
