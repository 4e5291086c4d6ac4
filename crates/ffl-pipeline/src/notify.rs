//! Outbound message texts. The capture agent delivers these verbatim, so
//! the wording here is the whole user interface for senders and approvers.

use ffl_core::{
    CandidateReport, EfficiencyRating, EfficiencyReading, EfficiencyThresholds, FuelRecord,
    PendingApproval, RejectReason, CANONICAL_FIELDS,
};

pub fn confirmation_text(record: &FuelRecord, efficiency: Option<&EfficiencyReading>) -> String {
    let mut msg = String::from("[LOGGED] *FUEL REPORT LOGGED*\n\n");
    msg.push_str(&format!("Department: {}\n", record.department));
    msg.push_str(&format!("Driver: {}\n", record.driver));
    msg.push_str(&format!("Vehicle: {}\n", record.entity));
    msg.push_str(&format!("Fuel: {:.2} L ({})\n", record.liters, record.fuel_type));
    msg.push_str(&format!("Amount: KSH {:.0}\n", record.amount));
    msg.push_str(&format!("Odometer: {} km\n", record.odometer));

    if let Some(reading) = efficiency {
        msg.push_str("\n[STATS] *Fuel Efficiency*\n");
        msg.push_str(&format!(
            "Distance since last fill: {} km\n",
            reading.distance_km
        ));
        msg.push_str(&format!("Efficiency: *{:.1} km/L*\n", reading.km_per_liter));
        let rating = match reading.rating {
            EfficiencyRating::Good => "Good",
            EfficiencyRating::AlertLow => "Poor (check vehicle)",
            EfficiencyRating::AlertHigh => "Unusually high",
            EfficiencyRating::BelowGood | EfficiencyRating::AboveGood => "Normal",
        };
        msg.push_str(&format!("Rating: {rating}\n"));
    }

    msg.push_str(&format!("\n_{} | {}_", record.recorded_at, record.sender));
    msg
}

pub fn rejection_text(report: &CandidateReport, reason: &RejectReason) -> String {
    match reason {
        RejectReason::MissingFields(fields) => {
            let mut msg = String::from("[INCOMPLETE] *FUEL REPORT INCOMPLETE*\n\n");
            msg.push_str(&format!("Missing: {}\n\n", fields.join(", ")));
            msg.push_str("Please resend with all fields:\n");
            for field in CANONICAL_FIELDS {
                msg.push_str(&format!("{field}: ...\n"));
            }
            msg
        }
        RejectReason::NotInFleet(entity) => format!(
            "[X] *VEHICLE NOT RECOGNIZED*\n\n\
             {entity} is not in the approved fleet list.\n\
             Check the registration or contact an administrator.\n\n\
             _{}_",
            report.sender_name
        ),
        RejectReason::OdometerNotIncreased { current, previous } => format!(
            "[X] *ODOMETER NOT ACCEPTED*\n\n\
             Reading {current} km is not above the last accepted reading {previous} km.\n\
             Verify the odometer and resend.\n\n\
             _{}_",
            report.sender_name
        ),
    }
}

pub fn escalation_text(approval: &PendingApproval) -> String {
    let mut msg = format!(
        "[REVIEW] *{}*\n\n{}\n\n",
        match approval.kind {
            ffl_core::ApprovalKind::CooldownConflict => "DUPLICATE FUELING REPORTED",
            ffl_core::ApprovalKind::EditConflict => "FUEL REPORT EDITED",
        },
        approval.reason
    );

    msg.push_str(&format!("Vehicle: {}\n", approval.proposed.entity));
    if let Some(prior) = &approval.prior {
        msg.push_str(&format!(
            "Previous: {} | {} | {:.1} L | odometer {}\n",
            prior.recorded_at, prior.driver, prior.liters, prior.odometer
        ));
    }
    msg.push_str(&format!(
        "Proposed: {} | {} | {:.1} L | odometer {}\n",
        approval.proposed.recorded_at,
        approval.proposed.driver,
        approval.proposed.liters,
        approval.proposed.odometer
    ));

    if let Some(prior) = &approval.prior {
        if approval.proposed.odometer > prior.odometer {
            let distance = approval.proposed.odometer - prior.odometer;
            msg.push_str(&format!("Distance since previous: {distance} km\n"));
            if prior.liters > 0.0 {
                msg.push_str(&format!(
                    "Efficiency since previous: {:.1} km/L\n",
                    distance as f64 / prior.liters
                ));
            }
        }
    }

    for change in &approval.changes {
        match &change.delta {
            Some(delta) => msg.push_str(&format!(
                "{}: {} -> {} ({delta})\n",
                change.field, change.before, change.after
            )),
            None => msg.push_str(&format!(
                "{}: {} -> {}\n",
                change.field, change.before, change.after
            )),
        }
    }

    msg.push_str(&format!(
        "\n----------------------------\n\
         [ID] Approval ID: *{id}*\n\n\
         [OK] *!approve {id}* - Log as new record\n\
         [X] *!reject {id}* - Discard",
        id = approval.id
    ));
    msg
}

pub fn advisory_text(record: &FuelRecord, reading: &EfficiencyReading, thresholds: &EfficiencyThresholds) -> String {
    let headline = match reading.rating {
        EfficiencyRating::AlertLow => "LOW EFFICIENCY ALERT",
        EfficiencyRating::AlertHigh => "UNUSUALLY HIGH EFFICIENCY",
        EfficiencyRating::BelowGood => "EFFICIENCY BELOW EXPECTED BAND",
        EfficiencyRating::AboveGood => "EFFICIENCY ABOVE EXPECTED BAND",
        EfficiencyRating::Good => "EFFICIENCY",
    };
    format!(
        "[ALERT] *{headline}*\n\n\
         Vehicle: {}\n\
         Driver: {}\n\
         Efficiency: {:.1} km/L over {} km\n\
         Expected band: {:.0}-{:.0} km/L",
        record.entity,
        record.driver,
        reading.km_per_liter,
        reading.distance_km,
        thresholds.good_min,
        thresholds.good_max
    )
}

pub fn resolution_text(approval: &PendingApproval, approved: bool) -> String {
    if approved {
        format!(
            "[OK] Approval *{}* accepted. {} logged as a new record.",
            approval.id, approval.proposed.entity
        )
    } else {
        format!(
            "[X] Approval *{}* rejected. Report for {} discarded.",
            approval.id, approval.proposed.entity
        )
    }
}
