use chrono::Utc;
use clap::Args;

use leadflow::billing::PlanId;
use leadflow::config::AppConfig;
use leadflow::directory::{DirectoryRepository, LocationId, ProviderId};
use leadflow::error::AppError;
use leadflow::leads::{Actor, AuditTrail, LeadStatus, LeadSubmission};

use crate::infra::{build_infra, seed_directory, Infra};

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Number of leads to submit against the round-robin location
    #[arg(long, default_value_t = 4)]
    pub(crate) leads: usize,
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    let infra = build_infra(&config);
    seed_directory(&infra);

    println!("Lead distribution demo");
    println!("======================");

    subscribe_providers(&infra)?;
    upgrade_first_provider(&infra)?;
    walk_assignment_policies(&infra, args.leads)?;
    update_a_lead_status(&infra)?;
    print_billing_history(&infra)?;

    println!(
        "\n{} notifications dispatched to the sink",
        infra.sink.delivered()
    );
    Ok(())
}

fn subscribe_providers(infra: &Infra) -> Result<(), AppError> {
    println!("\nCheckout and activation");
    let providers = infra
        .directory
        .providers_for_location(LocationId(1))
        .unwrap_or_default();

    for provider in providers {
        let session = infra.reconciler.checkout(&provider, PlanId(1))?;
        println!("- {} -> {}", provider.name, session.url);

        if let Some(event) = infra.processor.complete_checkout(&session.id) {
            infra.reconciler.apply_external_event(&event)?;
        }
        if let Some(subscription) = infra.reconciler.subscription_for(provider.id)? {
            println!(
                "  subscription {} ({})",
                subscription.status.label(),
                subscription
                    .subscription_ref
                    .as_deref()
                    .unwrap_or("pending")
            );
        }
    }
    Ok(())
}

fn upgrade_first_provider(infra: &Infra) -> Result<(), AppError> {
    println!("\nPlan change");
    let Some(provider) = provider_by_id(infra, ProviderId(1)) else {
        return Ok(());
    };

    let updated = infra
        .reconciler
        .change_plan(&provider, PlanId(2), Utc::now())?;
    println!(
        "- {} moved to plan {} ({})",
        provider.name,
        updated.plan_id.map(|id| id.to_string()).unwrap_or_default(),
        updated.status.label()
    );

    if let Some(event) = infra.reconciler.history_for(provider.id)?.first() {
        println!(
            "  history: {} | proration credit {}",
            event.description, event.metadata["proration_credit"]
        );
    }
    Ok(())
}

fn walk_assignment_policies(infra: &Infra, lead_count: usize) -> Result<(), AppError> {
    println!("\nRound robin (des-moines)");
    for n in 0..lead_count {
        let lead = infra
            .lifecycle
            .submit(submission("des-moines", "50310", &format!("Lead {}", n + 1)))?;
        println!("- lead {} -> {}", lead.id, assignee(infra, &lead.provider_id));
    }

    println!("\nGeographic (cedar-rapids, lead zip 52402)");
    let lead = infra
        .lifecycle
        .submit(submission("cedar-rapids", "52402", "Geo Lead"))?;
    println!("- lead {} -> {}", lead.id, assignee(infra, &lead.provider_id));

    println!("\nLoad balance (iowa-city)");
    let lead = infra
        .lifecycle
        .submit(submission("iowa-city", "52240", "Balanced Lead"))?;
    println!("- lead {} -> {}", lead.id, assignee(infra, &lead.provider_id));

    println!("\nManual (quad-cities)");
    let lead = infra
        .lifecycle
        .submit(submission("quad-cities", "52801", "Manual Lead"))?;
    println!("- lead {} -> {}", lead.id, assignee(infra, &lead.provider_id));

    Ok(())
}

fn update_a_lead_status(infra: &Infra) -> Result<(), AppError> {
    println!("\nLifecycle audit trail");
    let Some(lead) = infra.lifecycle.lead(leadflow::leads::LeadId(1))? else {
        return Ok(());
    };
    let Some(provider_id) = lead.provider_id else {
        return Ok(());
    };
    let Some(provider) = provider_by_id(infra, provider_id) else {
        return Ok(());
    };

    let actor = Actor::provider(provider_id.0, provider.name);
    let updated = infra
        .lifecycle
        .change_status(lead.id, LeadStatus::Contacted, &actor)?;
    println!("- lead {} is now {}", updated.id, updated.status.label());

    for note in infra.audit.notes_for(updated.id).unwrap_or_default() {
        println!("  note [{}] {}", note.kind.label(), note.body);
    }
    for entry in infra.audit.activity_for(updated.id).unwrap_or_default() {
        println!(
            "  activity [{}] {} by {}",
            entry.event_type.label(),
            entry.description,
            entry.actor.name
        );
    }
    Ok(())
}

fn print_billing_history(infra: &Infra) -> Result<(), AppError> {
    println!("\nSubscription history (provider 1)");
    for event in infra.reconciler.history_for(ProviderId(1))? {
        println!(
            "- {} [{}] {}",
            event.event_type.label(),
            event.status.label(),
            event.description
        );
    }
    Ok(())
}

fn provider_by_id(
    infra: &Infra,
    id: ProviderId,
) -> Option<leadflow::directory::ServiceProvider> {
    infra.directory.provider(id).ok().flatten()
}

fn assignee(infra: &Infra, provider_id: &Option<ProviderId>) -> String {
    match provider_id {
        Some(id) => provider_by_id(infra, *id)
            .map(|provider| provider.name)
            .unwrap_or_else(|| format!("provider {id}")),
        None => "unassigned (manual follow-up)".to_string(),
    }
}

fn submission(slug: &str, zip: &str, name: &str) -> LeadSubmission {
    LeadSubmission {
        location_slug: slug.to_string(),
        name: name.to_string(),
        phone: "555-0142".to_string(),
        email: format!(
            "{}@example.com",
            name.to_ascii_lowercase().replace(' ', ".")
        ),
        zip_code: zip.to_string(),
        project_type: "Kitchen remodel".to_string(),
        timing: "Within a month".to_string(),
        notes: None,
    }
}
