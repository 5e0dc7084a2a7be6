//! Student roster import. Courses are `;`-separated within a cell.

use std::io::Read;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::models::ProfilePatch;
use crate::triage::TriageService;

#[derive(Debug, Deserialize)]
struct CsvRow {
    student_id: String,
    name: String,
    #[serde(default)]
    major: Option<String>,
    #[serde(default)]
    gpa: Option<f64>,
    #[serde(default)]
    current_courses: Option<String>,
    #[serde(default)]
    completed_courses: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RosterEntry {
    pub student_id: String,
    pub patch: ProfilePatch,
}

pub fn parse_roster<R: Read>(reader: R) -> anyhow::Result<Vec<RosterEntry>> {
    let mut reader = csv::Reader::from_reader(reader);
    let mut entries = Vec::new();

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("invalid roster row {}", line + 1))?;
        entries.push(RosterEntry {
            student_id: row.student_id.trim().to_string(),
            patch: ProfilePatch {
                name: Some(row.name),
                major: row.major.filter(|major| !major.trim().is_empty()),
                gpa: row.gpa,
                current_courses: row.current_courses.map(|cell| split_courses(&cell)),
                completed_courses: row.completed_courses.map(|cell| split_courses(&cell)),
            },
        });
    }

    Ok(entries)
}

pub async fn import_roster(service: &TriageService, csv_path: &Path) -> anyhow::Result<usize> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let entries = parse_roster(file)?;
    let mut imported = 0usize;

    for entry in entries {
        service
            .update_student_profile(&entry.student_id, &entry.patch)
            .await
            .with_context(|| format!("failed to import student {}", entry.student_id))?;
        imported += 1;
    }

    Ok(imported)
}

fn split_courses(cell: &str) -> Vec<String> {
    cell.split(';')
        .map(str::trim)
        .filter(|course| !course.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_courses_and_optional_columns() {
        let data = "\
student_id,name,major,gpa,current_courses,completed_courses
s-1,Avery Lee,Economics,3.4,ECON 201; STAT 110,ECON 101;MATH 120
s-2,Jules Moreno,,,,
";
        let entries = parse_roster(data.as_bytes()).unwrap();
        assert_eq!(entries.len(), 2);

        let avery = &entries[0];
        assert_eq!(avery.student_id, "s-1");
        assert_eq!(avery.patch.gpa, Some(3.4));
        assert_eq!(
            avery.patch.current_courses,
            Some(vec!["ECON 201".to_string(), "STAT 110".to_string()])
        );

        let jules = &entries[1];
        assert_eq!(jules.patch.major, None);
        assert_eq!(jules.patch.gpa, None);
        assert_eq!(jules.patch.completed_courses, None);
    }

    #[test]
    fn rejects_non_numeric_gpa() {
        let data = "student_id,name,major,gpa\ns-1,Avery Lee,Economics,high\n";
        assert!(parse_roster(data.as_bytes()).is_err());
    }
}
