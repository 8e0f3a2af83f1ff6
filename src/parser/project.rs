//! Project-level extraction: rows of a search-results page, the ~30 labeled
//! fields of a detail page, and the flat field list emitted to the sink.

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use super::labels::{extract_count, extract_label, extract_task_progress};
use super::tables::{aggregate_carpet_area, CarpetAreaSummary, UnitType, AREA_RANGE_KEYS};
use super::{all_elements, child_cells, following_rows, own_text, parse_int, value_text};
use crate::sink::{FieldValue, Record};

static RESULT_ROW_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table tbody tr").unwrap());
static ROW_LINK_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("b > a").unwrap());
static BUTTON_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("button").unwrap());

const PROPOSED_FSI_LABEL: &str = "Built-up-Area as per Proposed FSI (In sqmts) ( Proposed but not sanctioned) (As soon as approved, should be immediately updated in Approved FSI)";
const SANCTIONED_FSI_LABEL: &str =
    "Sanctioned FSI of the project applied for registration (Sanctioned Built-up Area)";
const PERMISSIBLE_FSI_LABEL: &str = "Permissible Total FSI of Plot (Permissible Built-up Area)";
const CO_PROMOTER_LABEL: &str =
    "Are there any Promoter(Land Owner/ Investor) (as defined by MahaRERA Order) in the project ?";
const WINGS_LABEL: &str = "Total Number of Proposed Building/Wings (In the Layout/Plot)";
const OPEN_PARKING_LABEL: &str =
    "Total no. of open Parking as per Sanctioned Plan (4-wheeler+2-Wheeler)";
const INSTALLATION_TASK_LABEL: &str = "Installation of lifts, water pumps, Fire Fighting Fittings and Equipment as per CFO NOC, Electrical fittings to Common Areas, electro, mechanical equipment, Compliance to conditions of environment /CRZ NOC, Finishing to entrance lobby/s, plinth protection, paving of areas appurtenant to Building/Wing, Compound Wall and all other requirements as may be required to Obtain Occupation /Completion Certificate";

// Any of these in a document-row caption means a Form 4 upload is present.
const FORM_4_KEYWORDS: [&str; 5] = [
    "Certificates of Architect",
    "Completion Certificate",
    "certificate of completion",
    "Certificate on Completion",
    "Form 4",
];

/// One row of the search-results table.
#[derive(Debug, Clone)]
pub struct ProjectRow {
    pub project_name: String,
    pub promoter_name: String,
    pub last_modified: String,
    pub details_href: Option<String>,
    pub certificate: Option<CertificateRef>,
}

#[derive(Debug, Clone)]
pub struct CertificateRef {
    pub doc_name: String,
    pub qstr: String,
}

/// Fields read off a detail page. Everything defaults to empty/zero; a field
/// the page does not carry never fails the record.
#[derive(Debug, Default, Clone)]
pub struct ProjectDetails {
    pub past_experience: String,
    pub pin_code: String,
    pub office_number: String,
    pub website: String,
    pub project_status: String,
    pub proposed_completion: String,
    pub revised_completion: String,
    pub litigations: String,
    pub project_type: String,
    pub co_promoter: String,
    pub division: String,
    pub district: String,
    pub taluka: String,
    pub village: String,
    pub street_pin_code: String,
    pub plot_area: String,
    pub proposed_wings: i64,
    pub open_space: String,
    pub sanctioned_fsi: String,
    pub proposed_fsi: String,
    pub permissible_fsi: String,
    pub bank_name: String,
    pub ifsc_code: String,
    pub community_buildings_available: String,
    pub community_buildings_percent: String,
    pub sanctioned_floors: i64,
    pub open_parking: i64,
    pub closed_parking: i64,
    pub carpet: CarpetAreaSummary,
    /// Per-wing task completion averages.
    pub excavation: f64,
    pub slabs: f64,
    pub installations: f64,
    pub form_4: bool,
    pub conveyance: bool,
    pub complaint_rows: i64,
    pub litigation_rows: i64,
}

/// Fully assembled record for one project.
#[derive(Debug, Clone)]
pub struct ProjectRecord {
    pub project_name: String,
    pub promoter_name: String,
    pub last_modified: String,
    pub details: ProjectDetails,
    pub certificate_name: Option<String>,
    pub certificate_date: Option<String>,
}

/// Rows of a results page. Header rows and malformed rows are skipped.
pub fn parse_results_rows(doc: &Html) -> Vec<ProjectRow> {
    let mut rows = Vec::new();

    for tr in doc.select(&RESULT_ROW_SEL) {
        let cells = child_cells(tr, "td");
        if cells.len() < 5 {
            continue;
        }

        let details_href = cells[4]
            .select(&ROW_LINK_SEL)
            .next()
            .and_then(|a| a.attr("href"))
            .map(str::to_string);

        // The second link in the certificate cell carries the document
        // name and the query string for the ShowCertificate endpoint.
        let certificate = cells.get(6).and_then(|td| {
            let link = td.select(&ROW_LINK_SEL).nth(1)?;
            Some(CertificateRef {
                doc_name: link.attr("data-docname")?.to_string(),
                qstr: link.attr("data-qstr")?.to_string(),
            })
        });

        rows.push(ProjectRow {
            project_name: value_text(cells[1]),
            promoter_name: value_text(cells[2]),
            last_modified: value_text(cells[3]),
            details_href,
            certificate,
        });
    }

    rows
}

/// Page count from the "Total Pages :" label on a results page; 0 when the
/// label (or its value) is missing.
pub fn total_pages(doc: &Html) -> i32 {
    for label in
        all_elements(doc).filter(|e| e.value().name() == "label" && own_text(*e) == "Total Pages :")
    {
        for node in label.next_siblings() {
            if let Some(text) = node.value().as_text() {
                if text.trim().is_empty() {
                    continue;
                }
                return parse_int(text) as i32;
            }
        }
    }
    debug!("total pages label not found");
    0
}

pub fn extract_project_details(doc: &Html) -> ProjectDetails {
    let plain = |label: &str| extract_label(doc, label, None);
    let scoped = |label: &str, heading: &str| extract_label(doc, label, Some(heading));

    let proposed_completion = scoped("Proposed Date of Completion", "Project");
    let revised_completion = {
        let revised = scoped("Revised Proposed Date of Completion", "Project");
        if revised.is_empty() {
            proposed_completion.clone()
        } else {
            revised
        }
    };

    let proposed_wings = parse_int(&scoped(WINGS_LABEL, "Project"));
    // average over wings; a zero wing count counts as one
    let wings = proposed_wings.max(1) as f64;

    let (community_available, community_percent) = community_buildings(doc);

    ProjectDetails {
        past_experience: plain("Do you have any Past Experience ?"),
        pin_code: plain("Pin Code"),
        office_number: plain("Office Number"),
        website: plain("Website URL"),
        project_status: scoped("Project Status", "Project"),
        proposed_completion,
        revised_completion,
        litigations: scoped("Litigations related to the project ?", "Project"),
        project_type: scoped("Project Type", "Project"),
        co_promoter: scoped(CO_PROMOTER_LABEL, "Project"),
        division: scoped("Division", "Project"),
        district: scoped("District", "Project"),
        taluka: scoped("Taluka", "Project"),
        village: scoped("Village", "Project"),
        street_pin_code: scoped("Pin Code", "Project"),
        plot_area: scoped("Total Plot/Project area (sqmts)", "Project"),
        proposed_wings,
        open_space: scoped("Total Recreational Open Space as Per Sanctioned Plan", "Project"),
        sanctioned_fsi: scoped(SANCTIONED_FSI_LABEL, "FSI Details"),
        proposed_fsi: scoped(PROPOSED_FSI_LABEL, "FSI Details"),
        permissible_fsi: scoped(PERMISSIBLE_FSI_LABEL, "FSI Details"),
        bank_name: scoped("Bank Name", "Bank Details"),
        ifsc_code: scoped("IFSC Code", "Bank Details"),
        community_buildings_available: community_available,
        community_buildings_percent: community_percent,
        sanctioned_floors: extract_count(doc, "Number of Sanctioned Floors"),
        open_parking: extract_count(doc, OPEN_PARKING_LABEL),
        closed_parking: extract_count(doc, "Number of Closed Parking"),
        carpet: aggregate_carpet_area(doc),
        excavation: extract_task_progress(doc, "Excavation") as f64 / wings,
        slabs: extract_task_progress(doc, "X number of Slabs of Super Structure") as f64 / wings,
        installations: extract_task_progress(doc, INSTALLATION_TASK_LABEL) as f64 / wings,
        form_4: document_upload_present(doc, |caption| {
            FORM_4_KEYWORDS.iter().any(|k| caption.contains(k))
        }),
        conveyance: document_upload_present(doc, |caption| caption == "1 Status of Conveyance"),
        complaint_rows: rows_under_header(doc, "Complaint No"),
        litigation_rows: rows_under_header(doc, "Preventive/Injunction/Interim Order is Passed?"),
    }
}

/// The "Community Buildings :" row of the amenities table: availability in
/// the second cell, percentage in the third, spaces stripped.
fn community_buildings(doc: &Html) -> (String, String) {
    for td in
        all_elements(doc).filter(|e| e.value().name() == "td" && own_text(*e) == "Community Buildings :")
    {
        let Some(row) = td.parent().and_then(ElementRef::wrap) else {
            continue;
        };
        let cells = child_cells(row, "td");
        let squeeze = |cell: Option<&ElementRef>| {
            cell.map(|c| value_text(*c).replace(' ', "")).unwrap_or_default()
        };
        return (squeeze(cells.get(1)), squeeze(cells.get(2)));
    }
    debug!("no community buildings row");
    (String::new(), String::new())
}

/// True when a document row whose `<span>` caption satisfies `matches` has an
/// upload button in a following cell.
fn document_upload_present(doc: &Html, matches: impl Fn(&str) -> bool) -> bool {
    for span in all_elements(doc).filter(|e| e.value().name() == "span") {
        if !matches(&own_text(span)) {
            continue;
        }
        let Some(td) = span
            .parent()
            .and_then(ElementRef::wrap)
            .filter(|e| e.value().name() == "td")
        else {
            continue;
        };
        let has_button = td
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .filter(|e| e.value().name() == "td")
            .any(|sib| sib.select(&BUTTON_SEL).next().is_some());
        if has_button {
            return true;
        }
    }
    false
}

/// Number of data rows following the first header cell with the given text.
fn rows_under_header(doc: &Html, header: &str) -> i64 {
    let want = super::normalize(header);
    all_elements(doc)
        .find(|e| e.value().name() == "th" && own_text(*e) == want)
        .and_then(|th| th.parent().and_then(ElementRef::wrap))
        .map(|row| following_rows(row).count() as i64)
        .unwrap_or(0)
}

impl ProjectRecord {
    /// Ordered flat field list for the output sink. Certificate fields are
    /// present only when the row carried a certificate link / the decode
    /// succeeded, matching the first-record-schema contract of the sink.
    pub fn fields(&self) -> Record {
        let mut fields: Record = Vec::with_capacity(80);
        let mut push = |name: &str, value: FieldValue| fields.push((name.to_string(), value));
        let text = |s: &str| FieldValue::Text(s.to_string());

        push("Project Name", text(&self.project_name));
        push("Promoter Name", text(&self.promoter_name));
        push("Last Modified Date", text(&self.last_modified));

        let d = &self.details;
        push("Do you have any Past Experience ?", text(&d.past_experience));
        push("Pin Code", text(&d.pin_code));
        push("Office Number", text(&d.office_number));
        push("Website URL", text(&d.website));
        push("Project Status", text(&d.project_status));
        push("Proposed Date of Completion", text(&d.proposed_completion));
        push("Revised Proposed Date of Completion", text(&d.revised_completion));
        push("Litigations related to the project ?", text(&d.litigations));
        push("Project Type", text(&d.project_type));
        push("Are there any Promoter(Land Owner/ Investor)", text(&d.co_promoter));
        push("Division", text(&d.division));
        push("District", text(&d.district));
        push("Taluka", text(&d.taluka));
        push("Village", text(&d.village));
        push("Street Pin Code", text(&d.street_pin_code));
        push("Total Plot/Project area (sqmts)", text(&d.plot_area));
        push(WINGS_LABEL, FieldValue::Int(d.proposed_wings));
        push(
            "Total Recreational Open Space as Per Sanctioned Plan",
            text(&d.open_space),
        );
        push(SANCTIONED_FSI_LABEL, text(&d.sanctioned_fsi));
        push(PROPOSED_FSI_LABEL, text(&d.proposed_fsi));
        push(PERMISSIBLE_FSI_LABEL, text(&d.permissible_fsi));
        push("Bank Name", text(&d.bank_name));
        push("IFSC Code", text(&d.ifsc_code));
        push(
            "Community Buildings Available",
            text(&d.community_buildings_available),
        );
        push(
            "Community Buildings Percent",
            text(&d.community_buildings_percent),
        );
        push("Number of Sanctioned Floors", FieldValue::Int(d.sanctioned_floors));
        push(OPEN_PARKING_LABEL, FieldValue::Int(d.open_parking));
        push("Number of Closed Parking", FieldValue::Int(d.closed_parking));

        for (i, key) in AREA_RANGE_KEYS.iter().enumerate() {
            let bucket = d.carpet.area_ranges[i];
            push(
                &format!("carpet_area_apartments_{key}"),
                FieldValue::Float(bucket.units),
            );
            push(
                &format!("carpet_area_booked_apartments_{key}"),
                FieldValue::Float(bucket.booked),
            );
        }
        for ty in UnitType::ALL {
            let bucket = d.carpet.unit_bucket(ty);
            let suffix = ty.field_suffix();
            push(&format!("apartments_{suffix}"), FieldValue::Float(bucket.units));
            push(
                &format!("booked_apartments_{suffix}"),
                FieldValue::Float(bucket.booked),
            );
        }
        push("Carpet Area (in Sqmts)", FieldValue::Float(d.carpet.total_carpet_area));
        push("Number of Apartment", FieldValue::Float(d.carpet.total_units));
        push("Number of Booked Apartment", FieldValue::Float(d.carpet.total_booked));

        push("Excavation", FieldValue::Float(d.excavation));
        push("X number of Slabs of Super Structure", FieldValue::Float(d.slabs));
        push(
            "Installation of lifts, water pumps, Fire Fighting Fittings and Equipment",
            FieldValue::Float(d.installations),
        );

        push("form_4", text(if d.form_4 { "YES" } else { "NO" }));
        push("conveyance", text(if d.conveyance { "YES" } else { "NO" }));
        push("complaint_details", FieldValue::Int(d.complaint_rows));
        push("litigation_details", FieldValue::Int(d.litigation_rows));

        if let Some(name) = &self.certificate_name {
            push("View Certificate", text(name));
        }
        if let Some(date) = &self.certificate_date {
            push("Certificate Date", text(date));
        }

        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(name: &str) -> Html {
        let html = std::fs::read_to_string(format!("tests/fixtures/{name}.html")).unwrap();
        Html::parse_document(&html)
    }

    #[test]
    fn results_page_rows_and_pagination() {
        let doc = fixture("results_page");
        assert_eq!(total_pages(&doc), 3);

        let rows = parse_results_rows(&doc);
        assert_eq!(rows.len(), 2);

        assert_eq!(rows[0].project_name, "Green Acres");
        assert_eq!(rows[0].promoter_name, "Acme Developers");
        assert_eq!(rows[0].last_modified, "01/02/2023");
        assert_eq!(
            rows[0].details_href.as_deref(),
            Some("SearchList/ViewDetails?id=101")
        );
        let cert = rows[0].certificate.as_ref().unwrap();
        assert_eq!(cert.doc_name, "cert101.pdf");
        assert_eq!(cert.qstr, "Q101");

        assert_eq!(rows[1].project_name, "Blue Heights");
        assert!(rows[1].certificate.is_none());
    }

    #[test]
    fn detail_page_labeled_fields() {
        let doc = fixture("detail_page");
        let d = extract_project_details(&doc);

        assert_eq!(d.past_experience, "No");
        assert_eq!(d.pin_code, "400001");
        assert_eq!(d.website, "https://acme.example");
        assert_eq!(d.project_status, "New Project");
        assert_eq!(d.project_type, "Residential");
        assert_eq!(d.district, "Pune");
        assert_eq!(d.taluka, "Haveli");
        assert_eq!(d.village, "Wakad");
        assert_eq!(d.street_pin_code, "411057");
        assert_eq!(d.plot_area, "5000.00");
        assert_eq!(d.proposed_wings, 2);
        assert_eq!(d.sanctioned_fsi, "12000.00");
        assert_eq!(d.proposed_fsi, "1500.00");
        assert_eq!(d.permissible_fsi, "13500.00");
        assert_eq!(d.bank_name, "State Bank");
        assert_eq!(d.ifsc_code, "SBIN0000300");
    }

    #[test]
    fn revised_completion_falls_back_to_proposed() {
        let doc = fixture("detail_page");
        let d = extract_project_details(&doc);
        assert_eq!(d.proposed_completion, "31/12/2026");
        // fixture has no revised date
        assert_eq!(d.revised_completion, "31/12/2026");
    }

    #[test]
    fn detail_page_table_derived_fields() {
        let doc = fixture("detail_page");
        let d = extract_project_details(&doc);

        assert_eq!(d.sanctioned_floors, 22);
        assert_eq!(d.closed_parking, 75);
        assert_eq!(d.open_parking, 25);

        assert_eq!(d.carpet.total_units, 34.0);
        assert_eq!(d.carpet.total_booked, 13.0);

        // 180 excavation points over 2 wings
        assert_eq!(d.excavation, 90.0);
        assert_eq!(d.slabs, 50.0);
        assert_eq!(d.installations, 10.0);

        assert!(d.form_4);
        assert!(d.conveyance);
        assert_eq!(d.complaint_rows, 2);
        assert_eq!(d.litigation_rows, 1);

        assert_eq!(d.community_buildings_available, "Yes");
        assert_eq!(d.community_buildings_percent, "12.5%");
    }

    #[test]
    fn page_without_carpet_table_yields_zero_fields() {
        let doc = Html::parse_document("<html><body><p>nothing here</p></body></html>");
        let d = extract_project_details(&doc);
        let record = ProjectRecord {
            project_name: "X".to_string(),
            promoter_name: "Y".to_string(),
            last_modified: "Z".to_string(),
            details: d,
            certificate_name: None,
            certificate_date: None,
        };
        let fields = record.fields();
        let carpet_total = fields
            .iter()
            .find(|(name, _)| name.as_str() == "Carpet Area (in Sqmts)")
            .unwrap();
        assert_eq!(carpet_total.1, FieldValue::Float(0.0));
        assert!(fields
            .iter()
            .all(|(name, _)| name.as_str() != "Certificate Date"));
    }

    #[test]
    fn field_order_starts_with_summary_columns() {
        let record = ProjectRecord {
            project_name: "A".to_string(),
            promoter_name: "B".to_string(),
            last_modified: "C".to_string(),
            details: ProjectDetails::default(),
            certificate_name: Some("cert.pdf".to_string()),
            certificate_date: Some("01/01/2024".to_string()),
        };
        let fields = record.fields();
        assert_eq!(fields[0].0, "Project Name");
        assert_eq!(fields[1].0, "Promoter Name");
        assert_eq!(fields[2].0, "Last Modified Date");
        assert_eq!(fields.last().unwrap().0, "Certificate Date");
        // 3 summary + 28 detail + 36 buckets + 3 totals + 3 tasks + 4 flags/counts + 2 certificate
        assert_eq!(fields.len(), 79);
    }
}
