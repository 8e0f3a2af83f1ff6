//! Carpet-area table aggregation: bucketed unit counts by apartment type and
//! by size range, accumulated across the per-building table blocks.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html};
use tracing::debug;

use super::{all_elements, child_cells, column_index, following_rows, own_text, parse_float, value_text};

pub const CARPET_AREA_HEADER: &str = "Carpet Area (in Sqmts)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitType {
    OneRk,
    OneBhk,
    TwoBhk,
    ThreeBhk,
    FourBhk,
    FiveBhk,
    Shop,
    Bungalow,
    Office,
    Others,
}

impl UnitType {
    pub const ALL: [UnitType; 10] = [
        UnitType::OneRk,
        UnitType::OneBhk,
        UnitType::TwoBhk,
        UnitType::ThreeBhk,
        UnitType::FourBhk,
        UnitType::FiveBhk,
        UnitType::Shop,
        UnitType::Bungalow,
        UnitType::Office,
        UnitType::Others,
    ];

    /// Suffix used in output column names (`apartments_1rk`, ...).
    pub fn field_suffix(self) -> &'static str {
        match self {
            UnitType::OneRk => "1rk",
            UnitType::OneBhk => "1bhk",
            UnitType::TwoBhk => "2bhk",
            UnitType::ThreeBhk => "3bhk",
            UnitType::FourBhk => "4bhk",
            UnitType::FiveBhk => "5bhk",
            UnitType::Shop => "shops",
            UnitType::Bungalow => "bungalow",
            UnitType::Office => "office_space",
            UnitType::Others => "others",
        }
    }

    fn idx(self) -> usize {
        Self::ALL.iter().position(|t| *t == self).unwrap_or(9)
    }
}

// Ordered: patterns overlap, first match wins. Half-steps promote to the next
// size up ("2.5BHK" lands in the 3BHK bucket, never the 2BHK one).
static UNIT_PATTERNS: LazyLock<Vec<(Regex, UnitType)>> = LazyLock::new(|| {
    [
        (r"1RK|STUDIO", UnitType::OneRk),
        (r"1(BHK|RHK|RLK)", UnitType::OneBhk),
        (r"(2|1\.5)(BHK|RHK|RLK)", UnitType::TwoBhk),
        (r"(3|2\.5)(BHK|RHK|RLK)", UnitType::ThreeBhk),
        (r"(4|3\.5)(BHK|RHK|RLK)", UnitType::FourBhk),
        (r"(5|4\.5)(BHK|RHK|RLK)", UnitType::FiveBhk),
        (r"SHOP", UnitType::Shop),
        (r"BUNGALOW", UnitType::Bungalow),
        (r"OFFICE", UnitType::Office),
    ]
    .into_iter()
    .map(|(pat, ty)| (Regex::new(pat).unwrap(), ty))
    .collect()
});

/// Classify an apartment-type label. Case-insensitive, space-stripped.
pub fn classify_unit(label: &str) -> UnitType {
    let cleaned: String = label
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase();
    UNIT_PATTERNS
        .iter()
        .find(|(re, _)| re.is_match(&cleaned))
        .map(|(_, ty)| *ty)
        .unwrap_or(UnitType::Others)
}

/// Size-range column-name suffixes, lowest to open-ended top.
pub const AREA_RANGE_KEYS: [&str; 8] = [
    "0_30",
    "30_45",
    "45_60",
    "60_90",
    "90_120",
    "120_150",
    "150_200",
    "more_than_200",
];

/// Bucket index for a carpet area in square meters. Upper bounds are
/// inclusive; everything above 200 falls in the open top bucket. Unparseable
/// areas parse to 0 and land in the lowest bucket.
pub fn area_range(area: f64) -> usize {
    const UPPER: [f64; 7] = [30.0, 45.0, 60.0, 90.0, 120.0, 150.0, 200.0];
    UPPER.iter().position(|&hi| area <= hi).unwrap_or(7)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Bucket {
    pub units: f64,
    pub booked: f64,
}

#[derive(Debug, Default, Clone)]
pub struct CarpetAreaSummary {
    pub unit_types: [Bucket; 10],
    pub area_ranges: [Bucket; 8],
    /// Running sum of carpet_area × unit_count across all rows.
    pub total_carpet_area: f64,
    pub total_units: f64,
    pub total_booked: f64,
}

impl CarpetAreaSummary {
    pub fn unit_bucket(&self, ty: UnitType) -> Bucket {
        self.unit_types[ty.idx()]
    }
}

/// Aggregate every carpet-area table block in the document. Row layout is
/// positional relative to the carpet-area header: unit type at index-1, area
/// at index, unit count at index+1, booked count at index+2.
pub fn aggregate_carpet_area(doc: &Html) -> CarpetAreaSummary {
    let mut summary = CarpetAreaSummary::default();
    let headers: Vec<ElementRef> = all_elements(doc)
        .filter(|e| e.value().name() == "th" && own_text(*e) == CARPET_AREA_HEADER)
        .collect();

    if headers.is_empty() {
        debug!("no carpet area table in document");
        return summary;
    }

    for th in headers {
        let Some(header_row) = th.parent().and_then(ElementRef::wrap) else {
            continue;
        };
        let Some(idx) = column_index(header_row, th) else {
            continue;
        };
        for row in following_rows(header_row) {
            let cells = child_cells(row, "td");
            if idx == 0 || cells.len() <= idx + 2 {
                debug!("skipping misaligned carpet area row ({} cells)", cells.len());
                continue;
            }

            let area = parse_float(&value_text(cells[idx]));
            let unit_label = value_text(cells[idx - 1]);
            let units = parse_float(&value_text(cells[idx + 1]));
            let booked = parse_float(&value_text(cells[idx + 2]));

            summary.total_units += units;
            summary.total_booked += booked;
            summary.total_carpet_area += area * units;

            let by_type = &mut summary.unit_types[classify_unit(&unit_label).idx()];
            by_type.units += units;
            by_type.booked += booked;

            let by_range = &mut summary.area_ranges[area_range(area)];
            by_range.units += units;
            by_range.booked += booked;
        }
    }

    summary
}
