use axum::response::Html;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use tera::{Context, Tera};

use crate::prefs::{Language, Theme};

lazy_static! {
    static ref TEMPLATES: Tera = {
        let mut tera = Tera::default();
        tera.add_raw_templates(vec![
            ("base.html", include_str!("../templates/base.html")),
            ("home.html", include_str!("../templates/home.html")),
            ("login.html", include_str!("../templates/login.html")),
            ("register.html", include_str!("../templates/register.html")),
            ("request_password_reset.html", include_str!("../templates/request_password_reset.html")),
            ("reset_password.html", include_str!("../templates/reset_password.html")),
            ("profile.html", include_str!("../templates/profile.html")),
            ("edit_profile.html", include_str!("../templates/edit_profile.html")),
            ("change_password.html", include_str!("../templates/change_password.html")),
            ("admin_users.html", include_str!("../templates/admin_users.html")),
            ("404.html", include_str!("../templates/404.html")),
            ("500.html", include_str!("../templates/500.html")),
        ])
        .unwrap();
        tera
    };
}

/// Provinces offered in the address selects.
pub const PROVINCES: &[&str] = &[
    "Cartago",
    "Limón",
    "Puntarenas",
    "San José",
    "Heredia",
    "Guanacaste",
    "Alajuela",
];

pub const BLOOD_TYPES: &[&str] = &["A+", "A-", "B+", "B-", "AB+", "AB-", "O+", "O-"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashKind {
    Success,
    Info,
    Warning,
    Danger,
}

/// One-shot notice shown on the next rendered page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flash {
    pub kind: FlashKind,
    pub message: String,
}

/// Variables every page expects, with anonymous-visitor defaults.
pub fn base_context() -> Context {
    let mut ctx = Context::new();
    ctx.insert("theme", Theme::default().as_str());
    ctx.insert("lang", Language::default().as_str());
    ctx.insert("flashes", &Vec::<Flash>::new());
    ctx.insert("current_user", &Option::<()>::None);
    ctx
}

pub fn render_page(name: &str, ctx: &Context) -> Result<Html<String>, tera::Error> {
    TEMPLATES.render(name, ctx).map(Html)
}
