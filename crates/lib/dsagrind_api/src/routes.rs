//! Route paths.

pub const POST_AUTH_LOGIN: &str = "/api/auth/login";
pub const POST_AUTH_REGISTER: &str = "/api/auth/register";
pub const POST_AUTH_REFRESH: &str = "/api/auth/refresh";
pub const POST_AUTH_REVOKE: &str = "/api/auth/revoke";
pub const POST_AUTH_REVOKE_ALL: &str = "/api/auth/revoke-all";
pub const POST_AUTH_VERIFY_EMAIL: &str = "/api/auth/verify-email";
pub const POST_AUTH_RESEND_VERIFICATION: &str = "/api/auth/resend-verification";
pub const POST_AUTH_FORGOT_PASSWORD: &str = "/api/auth/forgot-password";
pub const POST_AUTH_RESET_PASSWORD: &str = "/api/auth/reset-password";
pub const POST_AUTH_CHANGE_PASSWORD: &str = "/api/auth/change-password";
pub const GET_AUTH_ME: &str = "/api/auth/me";
pub const PUT_AUTH_PROFILE: &str = "/api/auth/profile";
pub const GET_AUTH_OAUTH_URL: &str = "/api/auth/oauth/{provider}/url";
pub const GET_AUTH_OAUTH_CALLBACK: &str = "/api/auth/oauth/{provider}/callback";
