use rocket::Request;
use rocket::http::{Cookie, SameSite, Status};
use rocket::request::{FromRequest, Outcome};
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use serde_json::{Value, json};

pub const USER_COOKIE: &str = "user_id";

/// The authenticated caller. Sign-in happens upstream; this guard only
/// trusts the encrypted `user_id` cookie the auth layer sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: i64,
}

/// Cookie the auth layer hands out once a user has signed in.
pub fn user_cookie(user_id: i64) -> Cookie<'static> {
    Cookie::build((USER_COOKIE, user_id.to_string()))
        .same_site(SameSite::Lax)
        .http_only(true)
        .build()
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for CurrentUser {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(cookie) = request.cookies().get_private(USER_COOKIE) else {
            tracing::debug!("No user cookie on request");
            return Outcome::Error((Status::Unauthorized, ()));
        };

        match cookie.value().parse::<i64>() {
            Ok(id) => {
                tracing::debug!(user_id = id, "User authenticated via cookie");
                Outcome::Success(CurrentUser { id })
            }
            Err(err) => {
                tracing::warn!(error = %err, "Malformed user cookie");
                Outcome::Error((Status::Unauthorized, ()))
            }
        }
    }
}

#[catch(401)]
pub fn unauthorized_api(_req: &Request) -> Custom<Json<Value>> {
    let error_json = json!({
        "error": "Unauthorized",
        "message": "Authentication required"
    });

    Custom(Status::Unauthorized, Json(error_json))
}
