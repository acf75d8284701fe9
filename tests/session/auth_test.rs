use bytes::Bytes;
use nexus_client::ErrorCode;

use crate::common::connect;
use crate::common::new_cluster;

#[test]
fn test_register_and_login_errors() {
    let cluster = new_cluster(3);
    let session = connect(&cluster);

    session.register("dave", "hunter2").unwrap();
    assert_eq!(session.register("dave", "other").unwrap_err().code(), ErrorCode::UserExists);
    assert_eq!(session.login("erin", "pw").unwrap_err().code(), ErrorCode::UnknownUser);
    assert_eq!(session.login("dave", "wrong").unwrap_err().code(), ErrorCode::PasswordError);
    assert!(!session.is_logged_in());

    session.login("dave", "hunter2").unwrap();
    assert!(session.is_logged_in());
    assert_eq!(session.current_user_name().as_deref(), Some("dave"));
    assert!(session.current_user_id().is_some());
}

#[test]
fn test_user_cannot_log_in_twice() {
    let cluster = new_cluster(3);
    let first = connect(&cluster);
    let second = connect(&cluster);
    first.register("frank", "pw").unwrap();

    first.login("frank", "pw").unwrap();
    assert_eq!(second.login("frank", "pw").unwrap_err().code(), ErrorCode::UserExists);

    first.logout().unwrap();
    second.login("frank", "pw").unwrap();
}

#[test]
fn test_users_have_private_key_spaces() {
    let cluster = new_cluster(3);
    let grace = connect(&cluster);
    let heidi = connect(&cluster);
    grace.register("grace", "g").unwrap();
    grace.register("heidi", "h").unwrap();
    grace.login("grace", "g").unwrap();
    heidi.login("heidi", "h").unwrap();

    grace.put("profile", "grace's").unwrap();
    heidi.put("profile", "heidi's").unwrap();
    assert_eq!(grace.get("profile").unwrap(), Bytes::from("grace's"));
    assert_eq!(heidi.get("profile").unwrap(), Bytes::from("heidi's"));

    heidi.logout().unwrap();
    assert_eq!(heidi.get("profile").unwrap_err().code(), ErrorCode::NoSuchKey);
}

#[test]
fn test_revoked_token_is_denied() {
    let cluster = new_cluster(3);
    let session = connect(&cluster);
    session.register("ivan", "pw").unwrap();
    session.login("ivan", "pw").unwrap();

    // The cluster drops the login together with the session lease
    assert!(cluster.expire_session(&session.session_id()));
    assert_eq!(session.put("k", "v").unwrap_err().code(), ErrorCode::PermissionDenied);
    assert_eq!(session.logout().unwrap_err().code(), ErrorCode::UnknownUser);
    assert!(!session.is_logged_in());
}

#[test]
fn test_logout_without_login() {
    let cluster = new_cluster(1);
    let session = connect(&cluster);
    assert_eq!(session.logout().unwrap_err().code(), ErrorCode::UnknownUser);
    assert_eq!(session.last_error(), ErrorCode::UnknownUser);
}
