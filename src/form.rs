//! Form rendering and the "random fill" action.

use crate::dataset::Dataset;
use crate::schema::{FeatureKind, FeatureSchema};
use crate::session::SessionState;
use crate::types::{Banner, FeatureRecord, FeatureValue};
use minijinja::Environment;
use rand::Rng;
use serde::Serialize;

const PAGE_TEMPLATE: &str = include_str!("../templates/index.html");
const PAGE_TITLE: &str = "Removal Efficiency (%) Predictor - LightGBM";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChoiceView {
    pub value: String,
    pub selected: bool,
}

/// Closed-choice selector for a categorical feature
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectView {
    pub name: String,
    pub options: Vec<ChoiceView>,
}

impl SelectView {
    pub fn selected(&self) -> Option<&str> {
        self.options
            .iter()
            .find(|o| o.selected)
            .map(|o| o.value.as_str())
    }
}

/// Numeric input for a non-categorical feature
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumberView {
    pub name: String,
    pub value: f64,
    /// Value as shown in the input, four decimals
    pub display: String,
}

/// Everything the page template needs
#[derive(Debug, Clone, Serialize)]
pub struct PageView {
    pub title: &'static str,
    pub categorical: Vec<SelectView>,
    pub numeric: Vec<NumberView>,
    pub banner: Option<Banner>,
}

/// Builds page views and renders them to HTML
pub struct FormRenderer {
    env: Environment<'static>,
}

impl FormRenderer {
    pub fn new() -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();
        env.add_template("index.html", PAGE_TEMPLATE)?;
        Ok(Self { env })
    }

    /// Build the view for one render pass.
    ///
    /// Selectors default to the stashed value when it is one of their
    /// choices, otherwise to the first choice. Numeric inputs default to the
    /// stashed value or 0.
    pub fn build_view(
        &self,
        schema: &FeatureSchema,
        state: Option<&SessionState>,
        banner: Option<Banner>,
    ) -> PageView {
        let stashed = |name: &str| state.and_then(|s| s.get(name));

        let categorical = schema
            .categorical()
            .filter_map(|spec| match spec.kind {
                FeatureKind::Categorical(choices) => Some((spec, choices)),
                FeatureKind::Numeric => None,
            })
            .map(|(spec, choices)| {
                let default = stashed(&spec.name)
                    .and_then(FeatureValue::as_categorical)
                    .filter(|v| choices.contains(v))
                    .unwrap_or(choices[0]);
                SelectView {
                    name: spec.name.clone(),
                    options: choices
                        .iter()
                        .map(|c| ChoiceView {
                            value: c.to_string(),
                            selected: *c == default,
                        })
                        .collect(),
                }
            })
            .collect();

        let numeric = schema
            .numeric()
            .map(|spec| {
                let value = stashed(&spec.name)
                    .and_then(FeatureValue::as_numeric)
                    .unwrap_or(0.0);
                NumberView {
                    name: spec.name.clone(),
                    value,
                    display: format!("{:.4}", value),
                }
            })
            .collect();

        PageView {
            title: PAGE_TITLE,
            categorical,
            numeric,
            banner,
        }
    }

    pub fn render(&self, view: &PageView) -> Result<String, minijinja::Error> {
        self.env.get_template("index.html")?.render(view)
    }
}

/// Draw a uniformly random dataset row as a record of new defaults.
///
/// Empty categorical cells are absent from the record; callers replace the
/// session's stash with it so those selectors reset to their first choice.
pub fn random_fill<R: Rng + ?Sized>(
    dataset: &Dataset,
    schema: &FeatureSchema,
    rng: &mut R,
) -> Option<FeatureRecord> {
    dataset.sample_row(rng).map(|row| schema.record_from_row(row))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::tests::sample_dataset;
    use crate::types::BannerKind;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn schema() -> FeatureSchema {
        FeatureSchema::from_dataset(&sample_dataset()).unwrap()
    }

    #[test]
    fn test_fresh_session_uses_first_choice_and_zero() {
        let renderer = FormRenderer::new().unwrap();
        let view = renderer.build_view(&schema(), None, None);

        assert_eq!(view.categorical.len(), 5);
        assert_eq!(view.categorical[0].name, "Anode");
        assert_eq!(view.categorical[0].selected(), Some("Graphite"));
        assert_eq!(view.categorical[4].selected(), Some("Undivided reactor"));
        assert!(view.numeric.iter().all(|n| n.value == 0.0));
        assert_eq!(view.numeric[0].display, "0.0000");
    }

    #[test]
    fn test_stashed_values_become_defaults() {
        let renderer = FormRenderer::new().unwrap();
        let mut state = SessionState::new();
        let mut record = FeatureRecord::new();
        record.insert("Cathode", FeatureValue::Categorical("Pt plate".to_string()));
        // not one of the fixed Anode choices
        record.insert("Anode", FeatureValue::Categorical("Copper".to_string()));
        record.insert("pH", FeatureValue::Numeric(6.25));
        state.stash(&record);

        let view = renderer.build_view(&schema(), Some(&state), None);
        assert_eq!(view.categorical[1].selected(), Some("Pt plate"));
        assert_eq!(view.categorical[0].selected(), Some("Graphite"));
        let ph = view.numeric.iter().find(|n| n.name == "pH").unwrap();
        assert_eq!(ph.display, "6.2500");
    }

    #[test]
    fn test_random_fill_only_uses_dataset_rows() {
        let dataset = sample_dataset();
        let schema = FeatureSchema::from_dataset(&dataset).unwrap();
        let rows: Vec<FeatureRecord> = dataset
            .rows()
            .iter()
            .map(|row| schema.record_from_row(row))
            .collect();

        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..100 {
            let record = random_fill(&dataset, &schema, &mut rng).unwrap();
            assert!(rows.contains(&record));
        }
    }

    #[test]
    fn test_random_fill_resets_selector_for_empty_cell() {
        let csv = "Anode,Cathode,Electrolyte,Pollutant,Reactor type,Current density (mA/cm2),pH,Removal Efficiency(%)\nMWCNT,,NaCl,Phenol,Divided reactor,20,3.5,62.1\n";
        let dataset = Dataset::from_reader(
            csv.as_bytes(),
            "Removal Efficiency(%)",
            &crate::dataset::tests::CATEGORICAL,
        )
        .unwrap();
        let schema = FeatureSchema::from_dataset(&dataset).unwrap();
        let renderer = FormRenderer::new().unwrap();

        let mut state = SessionState::new();
        let mut previous = FeatureRecord::new();
        previous.insert("Cathode", FeatureValue::Categorical("Pt plate".to_string()));
        state.stash(&previous);

        let record = random_fill(&dataset, &schema, &mut StdRng::seed_from_u64(1)).unwrap();
        state.replace(&record);

        let view = renderer.build_view(&schema, Some(&state), None);
        assert_eq!(view.categorical[0].selected(), Some("MWCNT"));
        assert_eq!(view.categorical[1].selected(), Some("Graphite"));
        assert_eq!(view.categorical[4].selected(), Some("Divided reactor"));
    }

    #[test]
    fn test_render_shows_banner_and_inputs() {
        let renderer = FormRenderer::new().unwrap();
        let banner = Banner {
            kind: BannerKind::Success,
            message: "Predicted Removal Efficiency (%): 42.00".to_string(),
        };
        let view = renderer.build_view(&schema(), None, Some(banner));
        let html = renderer.render(&view).unwrap();

        assert!(html.contains("Predicted Removal Efficiency (%): 42.00"));
        assert!(html.contains("Black carbon (BC)"));
        assert!(html.contains("Current density (mA"));
        assert!(html.contains("value=\"0.0000\""));
    }
}
