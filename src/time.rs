//! Single place the engine asks "what time is it" (used by `time.unix`,
//! stats-window queries, and log timestamps), so call sites agree on a
//! clock source instead of calling `chrono`/`SystemTime` ad hoc.

pub fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}
