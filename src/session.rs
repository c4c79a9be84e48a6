//! 会话标识解析：决定一条事件的记忆落在哪个桶

use crate::event::MessageEvent;

/// 全局记忆模式下所有群聊共用的桶
pub const GLOBAL_SESSION_ID: &str = "global";

/// 群聊且开启全局模式 -> "global"；否则使用宿主的统一会话标识，缺失时退回原始会话句柄
pub fn resolve_session_id(event: &MessageEvent, global_mode: bool) -> String {
    if event.is_group() && global_mode {
        return GLOBAL_SESSION_ID.to_string();
    }
    match event.unified_msg_origin.as_deref() {
        Some(origin) if !origin.is_empty() => origin.to_string(),
        _ => event.session_id.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_in_global_mode() {
        let a = MessageEvent::group("100", "qq:group:100", "1", "alice");
        let b = MessageEvent::group("200", "qq:group:200", "2", "bob");
        assert_eq!(resolve_session_id(&a, true), GLOBAL_SESSION_ID);
        assert_eq!(resolve_session_id(&b, true), GLOBAL_SESSION_ID);
        assert_eq!(resolve_session_id(&a, false), "qq:group:100");
    }

    #[test]
    fn test_private_never_global() {
        let event = MessageEvent::private("qq:private:1", "1", "alice");
        assert_eq!(resolve_session_id(&event, true), "qq:private:1");
        assert_eq!(resolve_session_id(&event, false), "qq:private:1");
    }

    #[test]
    fn test_falls_back_to_raw_session() {
        let mut event = MessageEvent::private("ignored", "1", "alice");
        event.unified_msg_origin = None;
        event.session_id = "raw-42".to_string();
        assert_eq!(resolve_session_id(&event, true), "raw-42");

        event.group_id = Some(String::new());
        assert_eq!(resolve_session_id(&event, true), "raw-42");
    }
}
