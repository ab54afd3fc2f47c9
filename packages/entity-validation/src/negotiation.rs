//! Schema negotiation - fits the contract to what the page supports.
//!
//! Support for a field is the share of accepted INDIVIDUAL entities that
//! populate it. Unsupported required and expected fields are pruned,
//! well-supported discoverable fields are promoted, and thinly supported
//! expected fields are demoted. Rows are then checked against the final
//! contract and stripped of anything outside it.

use tracing::{debug, info};

use crate::types::{
    Classification, Entity, FieldTier, IncompleteRowPolicy, Issue, IssueKind, NegotiationConfig,
    SchemaContract,
};

/// Result of negotiating one job's contract.
#[derive(Debug)]
pub struct NegotiationOutcome {
    pub contract: SchemaContract,
    pub entities: Vec<Entity>,
    pub issues: Vec<Issue>,
}

/// Evidence-based schema negotiator.
#[derive(Debug, Clone, Default)]
pub struct SchemaNegotiator {
    config: NegotiationConfig,
}

impl SchemaNegotiator {
    pub fn new(config: NegotiationConfig) -> Self {
        Self { config }
    }

    /// Fill in support counts and rates from accepted entities.
    ///
    /// Returns the number of supporting entities.
    pub fn measure_support(&self, contract: &mut SchemaContract, entities: &[Entity]) -> usize {
        let supporters: Vec<&Entity> = entities
            .iter()
            .filter(|e| e.decision.is_accepted_individual())
            .collect();
        let total = supporters.len();

        for (name, spec) in contract.fields.iter_mut() {
            let count = supporters.iter().filter(|e| e.has_field(name)).count();
            spec.support_count = count;
            spec.support_rate = if total == 0 {
                0.0
            } else {
                count as f64 / total as f64
            };
        }
        total
    }

    /// Negotiate the contract and enforce row integrity.
    pub fn negotiate(&self, contract: &SchemaContract, entities: Vec<Entity>) -> NegotiationOutcome {
        let mut contract = contract.clone();
        let mut issues = Vec::new();
        let had_fields = !contract.is_empty();

        let supporters = self.measure_support(&mut contract, &entities);
        if supporters == 0 {
            debug!("No accepted entities; contract tiers left unchanged");
        } else {
            self.adjust_tiers(&mut contract, &mut issues);
        }

        if had_fields && contract.is_empty() {
            issues.push(Issue::new(
                IssueKind::AllFieldsPruned,
                "no field of the contract is supported by the page",
            ));
        }

        let entities = self.enforce_rows(&contract, entities, &mut issues);

        info!(
            fields = contract.fields.len(),
            required = contract.required_fields().len(),
            entities = entities.len(),
            "Schema negotiated"
        );

        NegotiationOutcome {
            contract,
            entities,
            issues,
        }
    }

    fn adjust_tiers(&self, contract: &mut SchemaContract, issues: &mut Vec<Issue>) {
        let mut pruned = Vec::new();

        for (name, spec) in contract.fields.iter_mut() {
            match spec.tier {
                FieldTier::Required | FieldTier::Expected if spec.support_count == 0 => {
                    pruned.push(name.clone());
                }
                FieldTier::Discoverable if spec.support_rate >= self.config.promotion_threshold => {
                    spec.tier = FieldTier::Expected;
                    issues.push(
                        Issue::new(
                            IssueKind::FieldPromoted,
                            format!("supported by {:.0}% of entities", spec.support_rate * 100.0),
                        )
                        .for_field(name.clone()),
                    );
                }
                FieldTier::Expected if spec.support_rate < self.config.demotion_threshold => {
                    spec.tier = FieldTier::Discoverable;
                    issues.push(
                        Issue::new(
                            IssueKind::FieldDemoted,
                            format!("supported by {:.0}% of entities", spec.support_rate * 100.0),
                        )
                        .for_field(name.clone()),
                    );
                }
                _ => {}
            }
        }

        for name in pruned {
            let tier = contract.tier_of(&name);
            contract.fields.shift_remove(&name);
            issues.push(
                Issue::new(
                    IssueKind::FieldPruned,
                    format!(
                        "{} field has no support on the page",
                        tier.map(|t| t.to_string()).unwrap_or_default()
                    ),
                )
                .for_field(name),
            );
        }
    }

    fn enforce_rows(
        &self,
        contract: &SchemaContract,
        entities: Vec<Entity>,
        issues: &mut Vec<Issue>,
    ) -> Vec<Entity> {
        let required: Vec<String> = contract
            .required_fields()
            .into_iter()
            .map(str::to_string)
            .collect();

        let mut kept = Vec::with_capacity(entities.len());
        for mut entity in entities {
            let missing: Vec<&str> = required
                .iter()
                .filter(|f| !entity.has_field(f))
                .map(String::as_str)
                .collect();

            if !missing.is_empty() {
                let message = format!("missing required field(s): {}", missing.join(", "));
                let drop = entity.decision.classification == Classification::Individual
                    && self.config.incomplete_row_policy == IncompleteRowPolicy::Drop;

                if drop {
                    issues.push(Issue::new(IssueKind::RowDropped, message).for_block(&entity.block_id));
                    continue;
                }
                entity.incomplete = true;
                issues.push(Issue::new(IssueKind::IncompleteRow, message).for_block(&entity.block_id));
            }

            entity.fields.retain(|name, _| contract.contains(name));
            entity
                .decision
                .extracted_fields
                .retain(|name, _| contract.contains(name));
            kept.push(entity);
        }
        kept
    }
}
