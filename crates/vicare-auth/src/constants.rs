//! Viessmann identity provider constants
//!
//! Endpoint URLs and fixed flow parameters. The client ID is not here: it is
//! issued per user in the Viessmann developer portal and passed in through
//! [`AuthConfig`](crate::AuthConfig).

use std::time::Duration;

/// Authorization endpoint the user opens in a browser
pub const AUTHORIZE_ENDPOINT: &str = "https://iam.viessmann.com/idp/v3/authorize";

/// Token endpoint for code exchange and token refresh
pub const TOKEN_ENDPOINT: &str = "https://iam.viessmann.com/idp/v3/token";

/// Port the local callback listener binds to. Registered as part of the
/// redirect URI in the developer portal, so it cannot change per run.
pub const CALLBACK_PORT: u16 = 4200;

/// `offline_access` is what makes the provider issue a refresh token.
pub const DEFAULT_SCOPE: &str = "IoT User offline_access";

/// How long the callback listener waits for the browser redirect.
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

/// Key under which the refresh token is stored in the settings file.
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";
