use std::fmt;

/// 一次加载的终态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadStatus {
    Success,
    /// 字节获取失败或为空。
    FileAccessError,
    /// 解码、格式转换或缩放失败。
    DecodeError,
    /// 绘制阶段的非设备丢失失败（如显存不足）。
    InsufficientResources,
    /// 读取解码结果尺寸等意外失败。
    Other,
}

impl LoadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::FileAccessError => "file_access_error",
            Self::DecodeError => "decode_error",
            Self::InsufficientResources => "insufficient_resources",
            Self::Other => "other",
        }
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 流水线当前所处阶段。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    Idle,
    Fetching,
    Decoding,
    Drawing,
    Completed(LoadStatus),
}

impl LoadStage {
    pub fn is_completed(self) -> bool {
        matches!(self, Self::Completed(_))
    }
}
