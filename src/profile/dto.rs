use serde::{Deserialize, Serialize};
use time::{format_description::FormatItem, macros::format_description, Date, OffsetDateTime};

use crate::forms::MultipartForm;
use crate::users::{ProfileUpdate, User};

const DATE_INPUT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");
const DATE_DISPLAY: &[FormatItem<'static>] = format_description!("[day]/[month]/[year]");
const DATETIME_DISPLAY: &[FormatItem<'static>] =
    format_description!("[day]/[month]/[year] [hour]:[minute]");

pub fn display_date(date: Date) -> String {
    date.format(DATE_DISPLAY).unwrap_or_default()
}

pub fn display_datetime(at: OffsetDateTime) -> String {
    at.format(DATETIME_DISPLAY).unwrap_or_default()
}

/// Values of the edit page, as typed. Blank inputs are `None`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileForm {
    pub username: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub second_last_name: Option<String>,
    pub phone: Option<String>,
    pub national_id: Option<String>,
    pub address: Option<String>,
    pub company: Option<String>,
    pub emergency_contact_name: Option<String>,
    pub emergency_contact_phone: Option<String>,
    pub blood_type: Option<String>,
    pub insurance_policy: Option<String>,
    pub insurer: Option<String>,
    pub allergies: Option<String>,
    pub chronic_conditions: Option<String>,
    /// `YYYY-MM-DD`, the value of a date input.
    pub birthday: Option<String>,
}

impl ProfileForm {
    pub fn from_user(user: &User) -> Self {
        Self {
            username: Some(user.username.clone()),
            email: user.email.clone(),
            first_name: Some(user.first_name.clone()),
            last_name: Some(user.last_name.clone()),
            second_last_name: user.second_last_name.clone(),
            phone: Some(user.phone.clone()),
            national_id: user.national_id.clone(),
            address: user.address.clone(),
            company: user.company.clone(),
            emergency_contact_name: user.emergency_contact_name.clone(),
            emergency_contact_phone: user.emergency_contact_phone.clone(),
            blood_type: user.blood_type.clone(),
            insurance_policy: user.insurance_policy.clone(),
            insurer: user.insurer.clone(),
            allergies: user.allergies.clone(),
            chronic_conditions: user.chronic_conditions.clone(),
            birthday: user.birthday.and_then(|d| d.format(DATE_INPUT).ok()),
        }
    }

    pub fn from_multipart(form: &MultipartForm) -> Self {
        Self {
            username: form.get("username"),
            email: form.get("email").map(|e| e.to_lowercase()),
            first_name: form.get("first_name"),
            last_name: form.get("last_name"),
            second_last_name: form.get("second_last_name"),
            phone: form.get("phone"),
            national_id: form.get("national_id"),
            address: form.get("address"),
            company: form.get("company"),
            emergency_contact_name: form.get("emergency_contact_name"),
            emergency_contact_phone: form.get("emergency_contact_phone"),
            blood_type: form.get("blood_type"),
            insurance_policy: form.get("insurance_policy"),
            insurer: form.get("insurer"),
            allergies: form.get("allergies"),
            chronic_conditions: form.get("chronic_conditions"),
            birthday: form.get("birthday"),
        }
    }

    /// Blank clears the birthday; anything else must be a calendar date.
    pub fn parsed_birthday(&self) -> Result<Option<Date>, time::error::Parse> {
        self.birthday
            .as_deref()
            .map(|raw| Date::parse(raw, DATE_INPUT))
            .transpose()
    }

    /// Merge into a full update. Required columns left blank keep their
    /// current value; the username is checked by the caller.
    pub fn into_update(self, current: &User, birthday: Option<Date>, avatar_url: String) -> ProfileUpdate {
        ProfileUpdate {
            username: self.username.unwrap_or_else(|| current.username.clone()),
            email: self.email,
            first_name: self.first_name.unwrap_or_else(|| current.first_name.clone()),
            last_name: self.last_name.unwrap_or_else(|| current.last_name.clone()),
            second_last_name: self.second_last_name,
            phone: self.phone.unwrap_or_else(|| current.phone.clone()),
            national_id: self.national_id,
            address: self.address,
            company: self.company,
            emergency_contact_name: self.emergency_contact_name,
            emergency_contact_phone: self.emergency_contact_phone,
            blood_type: self.blood_type,
            insurance_policy: self.insurance_policy,
            insurer: self.insurer,
            allergies: self.allergies,
            chronic_conditions: self.chronic_conditions,
            birthday,
            avatar_url,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordForm {
    #[serde(default)]
    pub current_password: String,
    #[serde(default)]
    pub new_password: String,
    #[serde(default)]
    pub confirm_password: String,
}
