//! Vendor application records.
//!
//! Created as a side effect of a vendor signing up. The storefront only ever
//! writes these; review happens elsewhere.

use serde::Serialize;

use apotheca_core::{ApplicationStatus, Email, IdentityId};

/// Business details collected on the vendor sign-up form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusinessInfo {
    pub business_name: String,
    pub business_license: String,
    pub business_address: String,
    pub business_description: Option<String>,
    pub contact_person: String,
}

/// Insert payload for the `vendor_applications` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewVendorApplication {
    pub user_id: IdentityId,
    pub business_name: String,
    pub business_license: String,
    pub business_address: String,
    pub business_description: Option<String>,
    pub contact_person: String,
    pub email: Email,
    pub status: ApplicationStatus,
}

impl NewVendorApplication {
    /// A pending application for a freshly signed-up vendor.
    ///
    /// A blank description is stored as null.
    #[must_use]
    pub fn pending(user_id: IdentityId, email: Email, info: &BusinessInfo) -> Self {
        Self {
            user_id,
            business_name: info.business_name.clone(),
            business_license: info.business_license.clone(),
            business_address: info.business_address.clone(),
            business_description: info
                .business_description
                .as_deref()
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_owned),
            contact_person: info.contact_person.clone(),
            email,
            status: ApplicationStatus::Pending,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn info(description: Option<&str>) -> BusinessInfo {
        BusinessInfo {
            business_name: "Bob Pharmacy".to_owned(),
            business_license: "PH-2231".to_owned(),
            business_address: "1 Main St".to_owned(),
            business_description: description.map(str::to_owned),
            contact_person: "Bob".to_owned(),
        }
    }

    #[test]
    fn test_pending_application_payload() {
        let user_id = IdentityId::random();
        let email = Email::parse("b@x.com").unwrap();
        let app = NewVendorApplication::pending(user_id, email, &info(Some("Compounding")));

        let value = serde_json::to_value(&app).unwrap();
        assert_eq!(value["user_id"], user_id.to_string());
        assert_eq!(value["business_name"], "Bob Pharmacy");
        assert_eq!(value["business_description"], "Compounding");
        assert_eq!(value["email"], "b@x.com");
        assert_eq!(value["status"], "pending");
    }

    #[test]
    fn test_blank_description_becomes_null() {
        let email = Email::parse("b@x.com").unwrap();
        let app = NewVendorApplication::pending(IdentityId::random(), email, &info(Some("  ")));
        assert_eq!(app.business_description, None);

        let value = serde_json::to_value(&app).unwrap();
        assert!(value["business_description"].is_null());
    }
}
