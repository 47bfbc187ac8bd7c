// ==========================================
// 国际化 (i18n) 模块
// ==========================================
// 面向用户的执行错误消息（zh-CN 默认，en 可选）
// 宏 rust_i18n::i18n! 在 lib.rs 中初始化
// ==========================================

/// 语言环境变量
pub const LOCALE_ENV: &str = "LOTTERY_ENGINE_LOCALE";

/// 支持的语言
pub const SUPPORTED_LOCALES: [&str; 2] = ["zh-CN", "en"];

pub fn current_locale() -> String {
    rust_i18n::locale().to_string()
}

/// 切换语言
///
/// # 返回
/// - true: 已切换
/// - false: 不支持的语言，保持当前设置
pub fn set_locale(locale: &str) -> bool {
    match SUPPORTED_LOCALES.iter().find(|l| l.eq_ignore_ascii_case(locale)) {
        Some(supported) => {
            rust_i18n::set_locale(supported);
            true
        }
        None => false,
    }
}

/// 按环境变量设置语言（未设置或不支持时保持默认）
pub fn init_from_env() {
    if let Ok(locale) = std::env::var(LOCALE_ENV) {
        if !set_locale(locale.trim()) {
            tracing::warn!(locale = %locale, "不支持的语言设置，使用默认语言");
        }
    }
}

/// 翻译消息
///
/// ```no_run
/// let msg = lottery_engine::i18n::t("lottery.already_reserved");
/// ```
pub fn t(key: &str) -> String {
    rust_i18n::t!(key).to_string()
}

/// 翻译消息并替换 `%{name}` 占位符
pub fn t_with_args(key: &str, args: &[(&str, &str)]) -> String {
    args.iter().fold(t(key), |message, (name, value)| {
        message.replace(&format!("%{{{}}}", name), value)
    })
}
