//! User-facing reply texts.

pub const SESSION_RESET: &str = "会话已重置";
pub const DRAW_PROMPT_MISSING: &str = "请在命令后输入绘画提示词";
pub const VIDEO_PROMPT_MISSING: &str = "请在命令后输入视频描述";
pub const DRAW_IN_PROGRESS: &str = "正在生成图片,请稍候...";
pub const DRAW_EMPTY_RESULT: &str = "图片生成失败";
pub const DRAW_REQUEST_FAILED: &str = "绘图请求处理失败,请稍后重试";
pub const VIDEO_IN_PROGRESS: &str = "正在生成视频,请稍候...";
pub const IMAGE_ACQUIRE_FAILED: &str = "获取图片失败,请重新发送图片";
pub const IMAGE_UPLOAD_FAILED: &str = "上传图片失败";
pub const VIDEO_SUBMIT_FAILED: &str = "创建视频任务失败";
pub const VIDEO_RESULT_FAILED: &str = "获取视频结果失败";
pub const WORKER_START_FAILED: &str = "任务启动失败,请稍后重试";

pub fn waiting_for_image(ttl_secs: u64) -> String {
    if ttl_secs >= 60 && ttl_secs % 60 == 0 {
        return format!("请在{}分钟内发送一张图片,用于生成视频", ttl_secs / 60);
    }
    format!("请在{ttl_secs}秒内发送一张图片,用于生成视频")
}
