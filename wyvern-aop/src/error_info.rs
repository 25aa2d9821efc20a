//! 结构化的错误信息
//!
//! 拦截器记录失败调用时使用，把 `anyhow` 的 cause chain 展开成可读文本

use std::error::Error;

/// 结构化的错误信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    /// 最外层错误消息
    pub message: String,

    /// 错误源链（cause chain），不含最外层
    pub source_chain: Vec<String>,
}

impl ErrorInfo {
    /// 从标准错误创建
    pub fn from_error<E: Error + ?Sized>(error: &E) -> Self {
        let mut source_chain = Vec::new();
        let mut current = error.source();
        while let Some(source) = current {
            source_chain.push(source.to_string());
            current = source.source();
        }

        Self {
            message: error.to_string(),
            source_chain,
        }
    }

    /// 从 `anyhow::Error` 创建，保留所有 context 层
    pub fn from_anyhow(error: &anyhow::Error) -> Self {
        let mut chain = error.chain().map(|cause| cause.to_string());
        let message = chain.next().unwrap_or_default();
        Self {
            message,
            source_chain: chain.collect(),
        }
    }

    /// 只包含消息
    pub fn simple(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source_chain: Vec::new(),
        }
    }

    /// 最底层的原因
    pub fn root_cause(&self) -> &str {
        self.source_chain.last().unwrap_or(&self.message)
    }

    /// 完整的错误描述（包含源链）
    pub fn full_description(&self) -> String {
        if self.source_chain.is_empty() {
            self.message.clone()
        } else {
            format!("{}\nCaused by:\n  {}", self.message, self.source_chain.join("\n  "))
        }
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        for cause in &self.source_chain {
            write!(f, ": {}", cause)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_from_anyhow_keeps_context_layers() {
        let error = Err::<(), _>(anyhow::anyhow!("connection refused"))
            .context("failed to load order 42")
            .unwrap_err();
        let info = ErrorInfo::from_anyhow(&error);

        assert_eq!(info.message, "failed to load order 42");
        assert_eq!(info.source_chain, vec!["connection refused".to_string()]);
        assert_eq!(info.root_cause(), "connection refused");
        assert_eq!(info.to_string(), "failed to load order 42: connection refused");
        assert_eq!(
            info.full_description(),
            "failed to load order 42\nCaused by:\n  connection refused"
        );
    }

    #[test]
    fn test_from_error_walks_sources() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let info = ErrorInfo::from_error(&io);
        assert_eq!(info.message, "missing");
        assert!(info.source_chain.is_empty());
        assert_eq!(ErrorInfo::simple("boom").root_cause(), "boom");
    }
}
