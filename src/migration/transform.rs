//! Transform functions - normalize staged source fields into target
//! entity candidates. All pure: a staged record either yields a
//! candidate or a skip, never an error.

use crate::migration::types::{FieldMap, HomeownerCandidate, MemberCandidate, StickerCandidate};
use crate::migration::utils::{assemble_notes, compose_address, parse_full_name};

/// Default source table names; `--table` overrides them per run.
pub const DEFAULT_HOMEOWNERS_TABLE: &str = "Homeowners";
pub const DEFAULT_MEMBERS_TABLE: &str = "Household Members";
pub const DEFAULT_STICKERS_TABLE: &str = "Vehicle Stickers";

/// Single-select label that marks a homeowner record as the owner
/// (as opposed to a tenant or caretaker).
const OWNER_LABEL: &str = "owner";

/// Build a homeowner candidate, or `None` when the record carries
/// neither a derivable name nor a derivable address.
pub fn homeowner_candidate(fields: &FieldMap) -> Option<HomeownerCandidate> {
    // Discrete name fields win over the free-form full name.
    let (first_name, last_name, middle_initial) = match (
        fields.any_text(&["First Name", "Firstname"]),
        fields.any_text(&["Last Name", "Lastname"]),
    ) {
        (None, None) => {
            let parsed =
                parse_full_name(fields.any_text(&["Name", "Full Name", "Homeowner Name"]).unwrap_or(""));
            (parsed.first, parsed.last, parsed.middle_initial)
        }
        (first, last) => (
            first.map(str::to_string),
            last.map(str::to_string),
            fields
                .any_text(&["Middle Initial", "M.I."])
                .map(|mi| mi.chars().take(1).collect()),
        ),
    };

    let address = compose_address(
        fields.any_text(&["Address", "Full Address", "Property Address"]),
        fields.text("Block"),
        fields.text("Lot"),
        fields.text("Phase"),
        fields.text("Street"),
    );

    if first_name.is_none() && last_name.is_none() && address.is_none() {
        return None;
    }

    // Fixed order; the assembled string must be reproducible across runs.
    let notes = assemble_notes(vec![
        fields
            .any_text(&["Other Contact", "Contact Info"])
            .map(|v| format!("Contact: {}", v)),
        fields.text("Facebook").map(|v| format!("Facebook: {}", v)),
        fields
            .any_text(&["Co-owner", "Spouse"])
            .map(|v| format!("Co-owner: {}", v)),
        fields
            .text("Years of Residency")
            .map(|v| format!("Years of residency: {}", v)),
        fields
            .text("Payment History")
            .map(|v| format!("Payment history: {}", v)),
    ]);

    Some(HomeownerCandidate {
        first_name,
        last_name,
        middle_initial,
        address,
        phone: fields
            .any_text(&["Contact Number", "Phone"])
            .map(str::to_string),
        email: fields.text("Email").map(str::to_string),
        is_owner: fields.bool_from_label("Status", OWNER_LABEL),
        move_in_year: fields.int("Move-in Year"),
        notes,
    })
}

/// Build a household-member candidate, or `None` when no name can be
/// derived. The parent link is passed through unresolved; the write
/// stage resolves it against the identity map.
pub fn member_candidate(fields: &FieldMap) -> Option<MemberCandidate> {
    let full_name = fields
        .any_text(&["Name", "Full Name", "Member Name"])?
        .to_string();

    Some(MemberCandidate {
        parent_record_id: fields
            .first_linked_id("Homeowner")
            .map(str::to_string),
        full_name,
        relationship: fields
            .any_text(&["Relationship", "Relation"])
            .map(str::to_string),
        birth_date: fields.date("Birthdate"),
    })
}

/// Build a vehicle + sticker candidate, or `None` when there is no plate
/// number to key the vehicle on.
pub fn sticker_candidate(fields: &FieldMap) -> Option<StickerCandidate> {
    let plate_number = fields
        .any_text(&["Plate Number", "Plate No.", "Plate"])?
        .to_uppercase()
        .replace(char::is_whitespace, "");
    if plate_number.is_empty() {
        return None;
    }

    Some(StickerCandidate {
        parent_record_id: fields
            .first_linked_id("Homeowner")
            .map(str::to_string),
        plate_number,
        vehicle_make: fields.text("Make").map(str::to_string),
        vehicle_model: fields.text("Model").map(str::to_string),
        vehicle_color: fields.text("Color").map(str::to_string),
        sticker_code: fields
            .any_text(&["Sticker Code", "Sticker No."])
            .map(str::to_string),
        issued_date: fields.date("Date Issued"),
        status: fields.text("Status").map(str::to_string),
    })
}
