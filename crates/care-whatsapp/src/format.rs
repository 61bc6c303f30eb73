//! Rendering of CARE results as WhatsApp text

use std::fmt::Write;

use care_client::{
    Appointment, MedicalRecord, Medication, NotificationReceipt, PatientSummary, Procedure,
    RecentPatient,
};

pub const NO_RECORDS: &str = "📄 No medical records found.";
pub const NO_MEDICATIONS: &str = "💊 No current medications found.";
pub const NO_PROCEDURES: &str = "🛠 No procedures found.";
pub const NO_APPOINTMENTS: &str = "📅 No upcoming appointments found.";
pub const NO_RECENT_PATIENTS: &str = "No recent patients found.";

fn or_na(value: &str) -> &str {
    if value.trim().is_empty() { "N/A" } else { value }
}

/// Append `label value` only when the value is present
fn optional_line(out: &mut String, label: &str, value: &str) {
    if !value.trim().is_empty() {
        let _ = writeln!(out, "{} {}", label, value);
    }
}

pub fn records(records: &[MedicalRecord]) -> String {
    if records.is_empty() {
        return NO_RECORDS.to_string();
    }

    let mut out = String::from("📄 *Medical Records:*\n");
    for record in records {
        out.push('\n');
        let _ = writeln!(out, "*Date:* {}", or_na(&record.date));
        let _ = writeln!(out, "*Diagnosis:* {}", or_na(&record.diagnosis));
        let _ = writeln!(out, "*Doctor:* {}", or_na(&record.doctor_name));
        optional_line(&mut out, "*Notes:*", &record.notes);
    }
    out.trim_end().to_string()
}

pub fn medications(medications: &[Medication]) -> String {
    if medications.is_empty() {
        return NO_MEDICATIONS.to_string();
    }

    let mut out = String::from("💊 *Current Medications:*\n");
    for med in medications {
        out.push('\n');
        let _ = writeln!(out, "*{}* - {}", or_na(&med.name), or_na(&med.dosage));
        let _ = writeln!(out, "Take: {}", or_na(&med.frequency));
        let _ = writeln!(
            out,
            "Duration: {} to {}",
            or_na(&med.start_date),
            or_na(&med.end_date)
        );
        optional_line(&mut out, "Prescribed by:", &med.prescriber_name);
    }
    out.trim_end().to_string()
}

pub fn procedures(procedures: &[Procedure]) -> String {
    if procedures.is_empty() {
        return NO_PROCEDURES.to_string();
    }

    let mut out = String::from("🛠 *Procedures:*\n");
    for procedure in procedures {
        out.push('\n');
        let _ = writeln!(out, "*{}* - {}", or_na(&procedure.name), or_na(&procedure.scheduled_date));
        let _ = writeln!(out, "Status: {}", or_na(&procedure.status));
        optional_line(&mut out, "Provider:", &procedure.provider_name);
        optional_line(&mut out, "Location:", &procedure.location);
        optional_line(&mut out, "Notes:", &procedure.notes);
    }
    out.trim_end().to_string()
}

pub fn appointments(appointments: &[Appointment]) -> String {
    if appointments.is_empty() {
        return NO_APPOINTMENTS.to_string();
    }

    let mut out = String::from("📅 *Upcoming Appointments:*\n");
    for appt in appointments {
        out.push('\n');
        let _ = writeln!(out, "*{} at {}*", or_na(&appt.date), or_na(&appt.time));
        let _ = writeln!(out, "Doctor: {}", or_na(&appt.doctor_name));
        let _ = writeln!(out, "Department: {}", or_na(&appt.department));
        optional_line(&mut out, "Status:", &appt.status);
        optional_line(&mut out, "Location:", &appt.location);
        optional_line(&mut out, "Notes:", &appt.notes);
    }
    out.trim_end().to_string()
}

pub fn search_results(query: &str, patients: &[PatientSummary]) -> String {
    if patients.is_empty() {
        return format!("No patient found matching: {}", query);
    }

    let mut out = format!("🔍 *Patients matching \"{}\":*\n", query);
    for patient in patients {
        out.push('\n');
        let _ = writeln!(out, "*ID:* {}", or_na(&patient.external_id));
        let _ = writeln!(out, "*Name:* {}", or_na(&patient.name));
        optional_line(&mut out, "*Phone:*", &patient.phone_number);
        optional_line(&mut out, "*Date of Birth:*", &patient.date_of_birth);
    }
    out.trim_end().to_string()
}

pub fn recent_patients(patients: &[RecentPatient]) -> String {
    if patients.is_empty() {
        return NO_RECENT_PATIENTS.to_string();
    }

    let mut out = String::from("🧑‍🤝‍🧑 *Recent Patients:*\n");
    for patient in patients {
        out.push('\n');
        let _ = writeln!(out, "*ID:* {}", or_na(&patient.external_id));
        let _ = writeln!(out, "*Name:* {}", or_na(&patient.name));
        let _ = writeln!(out, "*Visit Date:* {}", or_na(&patient.last_visit_date));
        optional_line(&mut out, "*Reason:*", &patient.last_visit_reason);
    }
    out.trim_end().to_string()
}

pub fn notification_sent(patient_id: &str, message: &str, receipt: &NotificationReceipt) -> String {
    format!(
        "✅ Notification sent to patient {}:\n\"{}\"\nReference: {}",
        patient_id, message, receipt.notification_id
    )
}

/// Split `text` into chunks of at most `max` characters
///
/// A chunk ends at the last newline inside its window when there is one;
/// that newline is dropped.
pub fn split_text(text: &str, max: usize) -> Vec<String> {
    if max == 0 || text.chars().count() <= max {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut rest = text;
    while rest.chars().count() > max {
        let window_end = rest
            .char_indices()
            .nth(max)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let cut = match rest[..window_end].rfind('\n') {
            Some(i) if i > 0 => i,
            _ => window_end,
        };

        chunks.push(rest[..cut].to_string());
        rest = &rest[cut..];
        rest = rest.strip_prefix('\n').unwrap_or(rest);
    }
    if !rest.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_empty_lists() {
        assert_eq!(records(&[]), NO_RECORDS);
        assert_eq!(medications(&[]), NO_MEDICATIONS);
        assert_eq!(procedures(&[]), NO_PROCEDURES);
        assert_eq!(appointments(&[]), NO_APPOINTMENTS);
        assert_eq!(recent_patients(&[]), NO_RECENT_PATIENTS);
        assert_eq!(search_results("Asha", &[]), "No patient found matching: Asha");
    }

    #[test]
    fn test_records_omit_empty_notes() {
        let text = records(&[
            MedicalRecord {
                date: "2024-03-01".to_string(),
                diagnosis: "Flu".to_string(),
                doctor_name: "Dr. Rao".to_string(),
                notes: "Rest".to_string(),
                ..Default::default()
            },
            MedicalRecord {
                date: "2024-04-01".to_string(),
                ..Default::default()
            },
        ]);

        assert!(text.starts_with("📄 *Medical Records:*"));
        assert!(text.contains("*Diagnosis:* Flu"));
        assert_eq!(text.matches("*Notes:*").count(), 1);
        assert!(text.contains("*Doctor:* N/A"));
    }

    #[test]
    fn test_medications_and_procedures() {
        let meds = medications(&[Medication {
            name: "Metformin".to_string(),
            dosage: "500mg".to_string(),
            frequency: "Twice daily".to_string(),
            start_date: "2024-01-01".to_string(),
            end_date: "2024-06-01".to_string(),
            ..Default::default()
        }]);
        assert!(meds.contains("*Metformin* - 500mg"));
        assert!(meds.contains("Duration: 2024-01-01 to 2024-06-01"));
        assert!(!meds.contains("Prescribed by"));

        let procs = procedures(&[Procedure {
            name: "Chest X-Ray".to_string(),
            scheduled_date: "2024-03-10".to_string(),
            status: "completed".to_string(),
            provider_name: "Radiology".to_string(),
            ..Default::default()
        }]);
        assert!(procs.contains("*Chest X-Ray* - 2024-03-10"));
        assert!(procs.contains("Provider: Radiology"));
        assert!(!procs.contains("Location"));
    }

    #[test]
    fn test_appointments_and_patients() {
        let appts = appointments(&[Appointment {
            date: "2024-03-20".to_string(),
            time: "10:00".to_string(),
            doctor_name: "Dr. Smith".to_string(),
            department: "Cardiology".to_string(),
            location: "Block B".to_string(),
            ..Default::default()
        }]);
        assert!(appts.contains("*2024-03-20 at 10:00*"));
        assert!(appts.contains("Location: Block B"));

        let found = search_results(
            "Asha",
            &[PatientSummary {
                external_id: "P1".to_string(),
                name: "Asha Kumar".to_string(),
                ..Default::default()
            }],
        );
        assert!(found.contains("*ID:* P1"));
        assert!(!found.contains("Phone"));

        let recent = recent_patients(&[RecentPatient {
            external_id: "P2".to_string(),
            name: "Ravi".to_string(),
            last_visit_date: "2024-03-12".to_string(),
            last_visit_reason: "Follow-up".to_string(),
            ..Default::default()
        }]);
        assert!(recent.contains("*Reason:* Follow-up"));
    }

    #[test]
    fn test_notification_sent() {
        let receipt = NotificationReceipt {
            notification_id: "N1".to_string(),
            sent_at: Utc::now(),
        };
        assert_eq!(
            notification_sent("P1", "Report ready", &receipt),
            "✅ Notification sent to patient P1:\n\"Report ready\"\nReference: N1"
        );
    }

    #[test]
    fn test_split_text() {
        assert_eq!(split_text("short", 10), vec!["short"]);
        assert_eq!(split_text("abcdefg", 3), vec!["abc", "def", "g"]);
        assert_eq!(split_text("a\nbbb", 3), vec!["a", "bbb"]);
        assert_eq!(split_text("ééééé", 2), vec!["éé", "éé", "é"]);
        assert_eq!(split_text("abc", 0), vec!["abc"]);
    }

    #[test]
    fn test_split_text_chunks_respect_limit() {
        let text = "line one\n".repeat(1000);
        for chunk in split_text(&text, 4096) {
            assert!(chunk.chars().count() <= 4096);
        }
    }
}
