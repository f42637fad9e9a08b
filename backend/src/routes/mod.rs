// Routes module - organizes all HTTP route handlers

pub mod auth;
pub mod candidates;
pub mod operators;
pub mod reports;
pub mod settings;
pub mod voters;
pub mod voting;

use std::io::Cursor;

use rocket::fs::NamedFile;
use rocket::http::{ContentType, Header, Status};
use rocket::request::Request;
use rocket::response::{self, Responder, Response};
use rocket::serde::json::Json;

use crate::config::AppConfig;
use crate::error::ErrorBody;

/// A file the browser should save rather than display.
pub struct Download {
    pub file_name: String,
    pub content_type: ContentType,
    pub body: Vec<u8>,
}

impl Download {
    pub fn csv(file_name: &str, body: impl Into<Vec<u8>>) -> Self {
        Download {
            file_name: file_name.to_string(),
            content_type: ContentType::CSV,
            body: body.into(),
        }
    }

    pub fn xlsx(file_name: &str, body: Vec<u8>) -> Self {
        Download {
            file_name: file_name.to_string(),
            content_type: ContentType::new(
                "application",
                "vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            ),
            body,
        }
    }
}

impl<'r> Responder<'r, 'static> for Download {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        Response::build()
            .header(self.content_type)
            .header(Header::new(
                "Content-Disposition",
                format!("attachment; filename=\"{}\"", self.file_name),
            ))
            .sized_body(self.body.len(), Cursor::new(self.body))
            .ok()
    }
}

fn error_json(message: &str) -> Json<ErrorBody> {
    Json(ErrorBody {
        error: message.to_string(),
        details: None,
    })
}

fn is_api(req: &Request<'_>) -> bool {
    req.uri().path().starts_with("/api/")
}

pub enum NotFound {
    Api(Json<ErrorBody>),
    Page(Option<NamedFile>),
}

impl<'r> Responder<'r, 'static> for NotFound {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        match self {
            NotFound::Api(body) => (Status::NotFound, body).respond_to(req),
            NotFound::Page(page) => (Status::NotFound, page).respond_to(req),
        }
    }
}

/// 404 error handler - JSON for the API, the custom 404.html page otherwise
#[catch(404)]
pub async fn not_found(req: &Request<'_>) -> NotFound {
    if is_api(req) {
        return NotFound::Api(error_json("not found"));
    }
    let page = match req.rocket().state::<AppConfig>() {
        Some(config) => NamedFile::open(format!("{}/404.html", config.static_dir))
            .await
            .ok(),
        None => None,
    };
    NotFound::Page(page)
}

#[catch(400)]
pub fn bad_request() -> Json<ErrorBody> {
    error_json("malformed request")
}

#[catch(401)]
pub fn unauthorized() -> Json<ErrorBody> {
    error_json("authentication required")
}

#[catch(403)]
pub fn forbidden() -> Json<ErrorBody> {
    error_json("operator role is not allowed to perform this action")
}

#[catch(422)]
pub fn unprocessable() -> Json<ErrorBody> {
    error_json("request body is missing fields or has the wrong shape")
}

#[catch(500)]
pub fn internal_error() -> Json<ErrorBody> {
    error_json("internal server error")
}

#[catch(503)]
pub fn unavailable() -> Json<ErrorBody> {
    error_json("service temporarily unavailable")
}
