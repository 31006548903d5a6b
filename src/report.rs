use std::fmt::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::indicators::CourseReport;
use crate::models::UserRow;

const USER_HEADERS: [&str; 4] = ["id", "username", "firstname", "lastname"];

/// One titled section of the rendered report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub slug: &'static str,
    pub title: &'static str,
    pub headers: Vec<&'static str>,
    pub rows: Vec<Vec<String>>,
}

fn user_rows(users: &[UserRow]) -> Vec<Vec<String>> {
    users
        .iter()
        .map(|user| {
            vec![
                user.id.to_string(),
                user.username.clone(),
                user.firstname.clone(),
                user.lastname.clone(),
            ]
        })
        .collect()
}

pub fn tables(report: &CourseReport) -> Vec<Table> {
    let mut message_headers = USER_HEADERS.to_vec();
    message_headers.extend(["inc_messages", "out_messages"]);

    vec![
        Table {
            slug: "user_messages",
            title: "Messages received and sent by each site user",
            headers: message_headers,
            rows: report
                .user_messages
                .iter()
                .map(|row| {
                    vec![
                        row.id.to_string(),
                        row.username.clone(),
                        row.firstname.clone(),
                        row.lastname.clone(),
                        row.incoming_messages.to_string(),
                        row.outgoing_messages.to_string(),
                    ]
                })
                .collect(),
        },
        Table {
            slug: "students_with_access",
            title: "Students who have accessed the course at least once",
            headers: USER_HEADERS.to_vec(),
            rows: user_rows(&report.students_with_access),
        },
        Table {
            slug: "active_last_week",
            title: "Students active in the course during the last week",
            headers: USER_HEADERS.to_vec(),
            rows: user_rows(&report.active_last_week),
        },
        Table {
            slug: "active_previous_week",
            title: "Students active in the course during the week before last",
            headers: USER_HEADERS.to_vec(),
            rows: user_rows(&report.active_previous_week),
        },
        Table {
            slug: "activity_interactions",
            title: "Distinct students who interacted with each course activity",
            headers: vec!["#", "contextinstanceid", "mod", "actname", "interactions"],
            rows: report
                .activity_interactions
                .iter()
                .map(|row| {
                    vec![
                        row.id.to_string(),
                        row.context_instance_id.to_string(),
                        row.module_type.clone(),
                        row.name.clone(),
                        row.interaction_count.to_string(),
                    ]
                })
                .collect(),
        },
        Table {
            slug: "resource_visualizations",
            title: "Views of each course resource per user",
            headers: vec!["#", "contextinstanceid", "component", "userid", "visualizations"],
            rows: report
                .resource_visualizations
                .iter()
                .map(|row| {
                    vec![
                        row.id.to_string(),
                        row.context_instance_id.to_string(),
                        row.component.clone(),
                        row.user_id.to_string(),
                        row.visualization_count.to_string(),
                    ]
                })
                .collect(),
        },
        Table {
            slug: "completed_activities",
            title: "Activities completed by each student in the course",
            headers: vec!["#", "userid", "completedactivities"],
            rows: report
                .completed_activities
                .iter()
                .map(|row| {
                    vec![
                        row.id.to_string(),
                        row.user_id.to_string(),
                        row.completed_count.to_string(),
                    ]
                })
                .collect(),
        },
    ]
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

pub fn render_html(report: &CourseReport) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "<!DOCTYPE html>");
    let _ = writeln!(output, "<html>");
    let _ = writeln!(output, "<head><meta charset=\"utf-8\">");
    let _ = writeln!(
        output,
        "<title>Course report [id:{}]</title></head>",
        report.course_id
    );
    let _ = writeln!(output, "<body>");
    let _ = writeln!(output, "<h2>Course report [id:{}]</h2>", report.course_id);

    for table in tables(report) {
        let _ = writeln!(output, "<p><strong>{}</strong></p>", escape_html(table.title));
        let _ = writeln!(output, "<table>");
        let _ = write!(output, "<thead><tr>");
        for header in &table.headers {
            let _ = write!(output, "<th>{}</th>", escape_html(header));
        }
        let _ = writeln!(output, "</tr></thead>");
        let _ = writeln!(output, "<tbody>");
        for row in &table.rows {
            let _ = write!(output, "<tr>");
            for cell in row {
                let _ = write!(output, "<td>{}</td>", escape_html(cell));
            }
            let _ = writeln!(output, "</tr>");
        }
        let _ = writeln!(output, "</tbody>");
        let _ = writeln!(output, "</table>");
    }

    let _ = writeln!(output, "</body>");
    let _ = writeln!(output, "</html>");
    output
}

fn markdown_cell(value: &str) -> String {
    value.replace('|', "\\|").replace('\n', " ")
}

pub fn render_markdown(report: &CourseReport) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Course Report [id:{}]", report.course_id);
    let _ = writeln!(output, "Generated at {}", report.generated_at.to_rfc3339());

    for table in tables(report) {
        let _ = writeln!(output);
        let _ = writeln!(output, "## {}", table.title);
        let _ = writeln!(output);
        let _ = writeln!(output, "| {} |", table.headers.join(" | "));
        let _ = writeln!(output, "|{}", "---|".repeat(table.headers.len()));

        if table.rows.is_empty() {
            let _ = writeln!(output);
            let _ = writeln!(output, "No rows.");
            continue;
        }

        for row in &table.rows {
            let cells: Vec<String> = row.iter().map(|cell| markdown_cell(cell)).collect();
            let _ = writeln!(output, "| {} |", cells.join(" | "));
        }
    }

    output
}

pub fn render_json(report: &CourseReport) -> anyhow::Result<String> {
    serde_json::to_string_pretty(report).context("failed to serialize report")
}

/// Writes one CSV file per section into `dir`, returning the paths written.
pub fn write_csv_dir(report: &CourseReport, dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;

    let mut written = Vec::new();
    for table in tables(report) {
        let path = dir.join(format!("{}.csv", table.slug));
        let mut writer = csv::Writer::from_path(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        writer.write_record(&table.headers)?;
        for row in &table.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        written.push(path);
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActivityInteraction, CompletedActivities, UserMessageSummary};
    use chrono::{TimeZone, Utc};

    fn sample_report() -> CourseReport {
        CourseReport {
            course_id: 2,
            generated_at: Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap(),
            user_messages: vec![UserMessageSummary {
                id: 1,
                username: "ada".to_string(),
                firstname: "Ada".to_string(),
                lastname: "<Lovelace>".to_string(),
                incoming_messages: 5,
                outgoing_messages: 3,
            }],
            students_with_access: Vec::new(),
            active_last_week: Vec::new(),
            active_previous_week: Vec::new(),
            activity_interactions: vec![ActivityInteraction {
                id: 0,
                context_instance_id: 7,
                module_type: "page".to_string(),
                name: "Intro | basics".to_string(),
                interaction_count: 0,
            }],
            resource_visualizations: Vec::new(),
            completed_activities: vec![CompletedActivities {
                id: 0,
                user_id: 1,
                completed_count: 2,
            }],
        }
    }

    #[test]
    fn sections_follow_page_order() {
        let slugs: Vec<&str> = tables(&sample_report()).iter().map(|t| t.slug).collect();
        assert_eq!(
            slugs,
            vec![
                "user_messages",
                "students_with_access",
                "active_last_week",
                "active_previous_week",
                "activity_interactions",
                "resource_visualizations",
                "completed_activities",
            ]
        );
    }

    #[test]
    fn html_escapes_cells_and_keeps_empty_headers() {
        let html = render_html(&sample_report());

        assert!(html.contains("<td>&lt;Lovelace&gt;</td>"));
        assert!(!html.contains("<Lovelace>"));
        assert_eq!(html.matches("<table>").count(), 7);
        assert!(html.contains("<th>inc_messages</th><th>out_messages</th>"));
        assert!(html.contains("<th>#</th><th>userid</th><th>completedactivities</th>"));
    }

    #[test]
    fn markdown_escapes_pipes_and_marks_empty_tables() {
        let markdown = render_markdown(&sample_report());

        assert!(markdown.contains("| 0 | 7 | page | Intro \\| basics | 0 |"));
        assert_eq!(markdown.matches("No rows.").count(), 4);
    }

    #[test]
    fn json_keeps_field_names() {
        let json = render_json(&sample_report()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["course_id"], 2);
        assert_eq!(value["user_messages"][0]["incoming_messages"], 5);
        assert_eq!(value["completed_activities"][0]["completed_count"], 2);
    }

    #[test]
    fn csv_dir_gets_one_file_per_section() {
        let dir = tempfile::tempdir().unwrap();
        let written = write_csv_dir(&sample_report(), dir.path()).unwrap();

        assert_eq!(written.len(), 7);
        let completed =
            std::fs::read_to_string(dir.path().join("completed_activities.csv")).unwrap();
        assert_eq!(completed, "#,userid,completedactivities\n0,1,2\n");
        let empty = std::fs::read_to_string(dir.path().join("active_last_week.csv")).unwrap();
        assert_eq!(empty, "id,username,firstname,lastname\n");
    }
}
