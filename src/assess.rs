use serde::Serialize;

/// The thirteen BRO assessment checkpoints, in template column order.
/// Wire keys are camelCase; each maps to its own column in
/// `radio_assessments`.
pub const CRITERIA: [(&str, &str); 13] = [
    ("firstClassLogbookCompleted", "first_class_logbook_completed"),
    ("basicCyberSecurityVideoWatched", "basic_cyber_security_video_watched"),
    ("correctUseOfBothFullCallsigns", "correct_use_of_both_full_callsigns"),
    ("authenticateRequested", "authenticate_requested"),
    ("authenticateAnsweredCorrectly", "authenticate_answered_correctly"),
    ("radioCheckRequested", "radio_check_requested"),
    ("radioCheckAnsweredCorrectly", "radio_check_answered_correctly"),
    ("tacticalMessageFullyAnswered", "tactical_message_fully_answered"),
    ("iSayAgainUsedCorrectly", "i_say_again_used_correctly"),
    ("sayAgainUsed", "say_again_used"),
    ("prowordKnowledgeCompletedOK", "proword_knowledge_completed_ok"),
    ("securityKnowledgeCompletedOK", "security_knowledge_completed_ok"),
    ("generalOperatingAndConfidence", "general_operating_and_confidence"),
];

pub const CRITERIA_COUNT: usize = CRITERIA.len();

pub fn criterion_column(key: &str) -> Option<&'static str> {
    CRITERIA
        .iter()
        .find(|(wire, _)| *wire == key)
        .map(|(_, column)| *column)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CriterionStatus {
    Pass,
    Fail,
    Pending,
}

impl CriterionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CriterionStatus::Pass => "PASS",
            CriterionStatus::Fail => "FAIL",
            CriterionStatus::Pending => "PENDING",
        }
    }

    pub fn parse(raw: &str) -> Option<CriterionStatus> {
        match raw {
            "PASS" => Some(CriterionStatus::Pass),
            "FAIL" => Some(CriterionStatus::Fail),
            "PENDING" => Some(CriterionStatus::Pending),
            _ => None,
        }
    }
}

/// A cadet passes overall when every criterion is PASS. Anything PENDING
/// or FAIL keeps the aggregate false. Recomputed from the full criterion
/// set and persisted in the same write as the criterion change.
pub fn overall_pass(statuses: &[CriterionStatus]) -> bool {
    statuses.len() == CRITERIA_COUNT && statuses.iter().all(|s| *s == CriterionStatus::Pass)
}

/// Both the on-screen print view and the PDF template take 10 cadet rows
/// per page.
pub const ROWS_PER_PAGE: usize = 10;

/// The shipped BRO results template has two result pages.
pub const DEFAULT_TEMPLATE_PAGES: usize = 2;

pub fn row_position(index: usize) -> (usize, usize) {
    (index / ROWS_PER_PAGE, index % ROWS_PER_PAGE)
}

pub fn page_count(rows: usize) -> usize {
    rows.div_ceil(ROWS_PER_PAGE)
}

// Template geometry, measured against the BRO Assessment Results
// multi-page form. Top-left origin; the shell's PDF renderer flips Y.
const ROW_START_Y: f64 = 228.0;
const ROW_HEIGHT: f64 = 27.8;
const SERIAL_X: f64 = 39.0;
const SQN_X: f64 = 84.0;
const RANK_X: f64 = 144.0;
const NAME_X: f64 = 210.0;
const CHECK_START_X: f64 = 399.5;
const CHECK_SPACING: f64 = 22.5;
const CHECK_Y_NUDGE: f64 = 2.5;
const ROW_TEXT_SIZE: f64 = 9.0;
const CHECK_SIZE: f64 = 10.0;
const HEADER_TEXT_SIZE: f64 = 9.0;
const INSTRUCTOR_Y: f64 = 483.0;
const ASSESSOR_Y: f64 = 508.0;
const HEADER_NAME_X: f64 = 205.0;
const HEADER_SQN_X: f64 = 385.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DrawKind {
    Text,
    Check,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawOp {
    pub page: usize,
    pub kind: DrawKind,
    pub x: f64,
    pub y: f64,
    pub size: f64,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct ExportCadet {
    pub sqn: String,
    pub rank: String,
    pub full_name: String,
    pub criteria: Vec<CriterionStatus>,
    pub passed: bool,
}

#[derive(Debug, Clone)]
pub struct ExportHeader {
    pub instructor_name: String,
    pub instructor_sqn: String,
    pub assessor_name: String,
    pub assessor_sqn: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportPlan {
    pub ops: Vec<DrawOp>,
    pub pages_used: usize,
    pub rows_placed: usize,
    pub dropped_cadets: usize,
}

fn text_op(page: usize, x: f64, y: f64, size: f64, value: impl Into<String>) -> DrawOp {
    DrawOp {
        page,
        kind: DrawKind::Text,
        x,
        y,
        size,
        value: value.into(),
    }
}

/// Lay the cohort's passing cadets onto the fixed template. The form is
/// an award certificate sheet: non-passers are excluded by rule, not by
/// error, and cadets beyond the template's page capacity are dropped and
/// counted. The check grid has fourteen columns: the thirteen criteria
/// and the overall pass box.
pub fn export_plan(
    cadets: &[ExportCadet],
    header: &ExportHeader,
    template_pages: usize,
) -> ExportPlan {
    let mut ops: Vec<DrawOp> = Vec::new();
    let mut rows_placed = 0usize;
    let mut pages_used = 0usize;
    let mut dropped = 0usize;

    for cadet in cadets.iter().filter(|c| c.passed) {
        let (page, row) = row_position(rows_placed + dropped);
        if page >= template_pages {
            dropped += 1;
            continue;
        }
        pages_used = pages_used.max(page + 1);
        let y = ROW_START_Y + (row as f64) * ROW_HEIGHT;

        let serial = rows_placed + dropped + 1;
        ops.push(text_op(page, SERIAL_X, y, ROW_TEXT_SIZE, serial.to_string()));
        ops.push(text_op(page, SQN_X, y, ROW_TEXT_SIZE, cadet.sqn.clone()));
        ops.push(text_op(page, RANK_X, y, ROW_TEXT_SIZE, cadet.rank.clone()));
        ops.push(text_op(page, NAME_X, y, ROW_TEXT_SIZE, cadet.full_name.clone()));

        for (col, status) in cadet.criteria.iter().enumerate() {
            if *status == CriterionStatus::Pass {
                ops.push(DrawOp {
                    page,
                    kind: DrawKind::Check,
                    x: CHECK_START_X + (col as f64) * CHECK_SPACING,
                    y: y + CHECK_Y_NUDGE,
                    size: CHECK_SIZE,
                    value: "X".to_string(),
                });
            }
        }
        // Overall pass box, last column of the grid.
        ops.push(DrawOp {
            page,
            kind: DrawKind::Check,
            x: CHECK_START_X + (CRITERIA_COUNT as f64) * CHECK_SPACING,
            y: y + CHECK_Y_NUDGE,
            size: CHECK_SIZE,
            value: "X".to_string(),
        });

        rows_placed += 1;
    }

    for page in 0..pages_used {
        ops.push(text_op(
            page,
            HEADER_NAME_X,
            INSTRUCTOR_Y,
            HEADER_TEXT_SIZE,
            header.instructor_name.clone(),
        ));
        ops.push(text_op(
            page,
            HEADER_SQN_X,
            INSTRUCTOR_Y,
            HEADER_TEXT_SIZE,
            header.instructor_sqn.clone(),
        ));
        ops.push(text_op(
            page,
            HEADER_NAME_X,
            ASSESSOR_Y,
            HEADER_TEXT_SIZE,
            header.assessor_name.clone(),
        ));
        ops.push(text_op(
            page,
            HEADER_SQN_X,
            ASSESSOR_Y,
            HEADER_TEXT_SIZE,
            header.assessor_sqn.clone(),
        ));
    }

    ExportPlan {
        ops,
        pages_used,
        rows_placed,
        dropped_cadets: dropped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cadet(name: &str, passed: bool) -> ExportCadet {
        let status = if passed {
            CriterionStatus::Pass
        } else {
            CriterionStatus::Pending
        };
        ExportCadet {
            sqn: "101".to_string(),
            rank: "Cdt".to_string(),
            full_name: name.to_string(),
            criteria: vec![status; CRITERIA_COUNT],
            passed,
        }
    }

    fn header() -> ExportHeader {
        ExportHeader {
            instructor_name: "Sgt Hale".to_string(),
            instructor_sqn: "101".to_string(),
            assessor_name: "FS Okafor".to_string(),
            assessor_sqn: "101".to_string(),
        }
    }

    #[test]
    fn criterion_lookup_maps_wire_keys() {
        assert_eq!(
            criterion_column("sayAgainUsed"),
            Some("say_again_used")
        );
        assert_eq!(criterion_column("notACriterion"), None);
        assert_eq!(CRITERIA_COUNT, 13);
    }

    #[test]
    fn overall_pass_requires_all_thirteen() {
        let all_pass = vec![CriterionStatus::Pass; CRITERIA_COUNT];
        assert!(overall_pass(&all_pass));

        let mut one_pending = all_pass.clone();
        one_pending[4] = CriterionStatus::Pending;
        assert!(!overall_pass(&one_pending));

        let mut one_fail = all_pass.clone();
        one_fail[12] = CriterionStatus::Fail;
        assert!(!overall_pass(&one_fail));
    }

    #[test]
    fn row_position_splits_at_ten() {
        assert_eq!(row_position(0), (0, 0));
        assert_eq!(row_position(9), (0, 9));
        assert_eq!(row_position(10), (1, 0));
        assert_eq!(row_position(22), (2, 2));
        assert_eq!(page_count(23), 3);
        assert_eq!(page_count(10), 1);
        assert_eq!(page_count(0), 0);
    }

    #[test]
    fn export_skips_non_passers_and_paginates() {
        // 23 cadets, 15 passed: expect 15 rows across 2 pages.
        let mut cohort: Vec<ExportCadet> = Vec::new();
        for i in 0..23 {
            cohort.push(cadet(&format!("Cadet {:02}", i), i < 15));
        }
        let plan = export_plan(&cohort, &header(), DEFAULT_TEMPLATE_PAGES);
        assert_eq!(plan.rows_placed, 15);
        assert_eq!(plan.pages_used, 2);
        assert_eq!(plan.dropped_cadets, 0);

        let serials: Vec<&DrawOp> = plan
            .ops
            .iter()
            .filter(|op| op.kind == DrawKind::Text && (op.x - 39.0).abs() < f64::EPSILON)
            .collect();
        assert_eq!(serials.len(), 15);
        assert_eq!(serials[10].page, 1);
        assert_eq!(serials[10].value, "11");
    }

    #[test]
    fn export_drops_overflow_beyond_template() {
        let cohort: Vec<ExportCadet> =
            (0..25).map(|i| cadet(&format!("C{}", i), true)).collect();
        let plan = export_plan(&cohort, &header(), DEFAULT_TEMPLATE_PAGES);
        assert_eq!(plan.rows_placed, 20);
        assert_eq!(plan.dropped_cadets, 5);
        assert_eq!(plan.pages_used, 2);
    }

    #[test]
    fn export_marks_fourteen_checks_per_passing_row() {
        let plan = export_plan(&[cadet("Solo", true)], &header(), 1);
        let checks = plan
            .ops
            .iter()
            .filter(|op| op.kind == DrawKind::Check)
            .count();
        assert_eq!(checks, CRITERIA_COUNT + 1);
    }

    #[test]
    fn export_headers_on_every_used_page() {
        let cohort: Vec<ExportCadet> =
            (0..12).map(|i| cadet(&format!("C{}", i), true)).collect();
        let plan = export_plan(&cohort, &header(), DEFAULT_TEMPLATE_PAGES);
        let header_ops: Vec<&DrawOp> = plan
            .ops
            .iter()
            .filter(|op| op.value == "Sgt Hale")
            .collect();
        assert_eq!(header_ops.len(), 2);
        assert!(header_ops.iter().any(|op| op.page == 0));
        assert!(header_ops.iter().any(|op| op.page == 1));
    }
}
