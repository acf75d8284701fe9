/// Session ids look like `<host>-<pid>-<nanoid>` so servers can tell clients apart in logs.
pub(crate) fn make_session_id() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    format!("{}-{}-{}", host, std::process::id(), nanoid::nanoid!(12))
}
