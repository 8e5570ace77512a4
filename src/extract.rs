use crate::domain::TableKind;
use crate::error::ExportError;
use crate::rds::{RObject, RdsFile};
use crate::table::{Cell, Column, Table};

pub const DEFAULT_PROFILE: &str = "RNASeq";
pub const EXP_DESIGN_COLUMNS: [&str; 4] = ["experiment", "name", "control", "treatment"];
pub const EXPERIMENT_ID_COLUMNS: [&str; 3] = ["experiment", "model_id", "drug"];

/// Read-only view over a decoded XevaSet. Every extractor takes it
/// explicitly; nothing is published to shared state.
#[derive(Debug, Clone, Copy)]
pub struct XevaSet<'a> {
    rds: &'a RdsFile,
    root: &'a RObject,
}

impl<'a> XevaSet<'a> {
    pub fn from_rds(rds: &'a RdsFile) -> Result<Self, ExportError> {
        let root = &rds.root;
        if !matches!(root, RObject::S4 { .. }) {
            return Err(ExportError::Deserialization(format!(
                "expected an S4 XevaSet object, found {}",
                root.type_name()
            )));
        }
        let set = Self { rds, root };
        let package = root
            .attr("class")
            .and_then(|class| class.attr("package"))
            .and_then(RObject::first_as_string);
        tracing::debug!(
            class = set.class_name().unwrap_or("<none>"),
            package = package.as_deref().unwrap_or("<none>"),
            "loaded S4 root object"
        );
        Ok(set)
    }

    pub fn class_name(&self) -> Option<&'a str> {
        self.root.class().into_iter().next()
    }

    fn slot(&self, name: &str) -> Result<&'a RObject, ExportError> {
        self.root
            .slot(name)
            .ok_or_else(|| ExportError::Extraction(format!("object has no slot @{name}")))
    }
}

pub fn extract_table(kind: TableKind, set: &XevaSet<'_>) -> Result<Table, ExportError> {
    match kind {
        TableKind::Expression => extract_expression(set, DEFAULT_PROFILE),
        TableKind::Model => extract_model(set),
        TableKind::ExpDesign => extract_exp_design(set),
        TableKind::Experiment => extract_experiment(set),
    }
}

/// `as.data.frame(exprs(set@molecularProfiles[[profile]]))`
pub fn extract_expression(set: &XevaSet<'_>, profile: &str) -> Result<Table, ExportError> {
    let profiles = set.slot("molecularProfiles")?;
    let eset = profiles.list_get(profile).ok_or_else(|| {
        ExportError::Extraction(format!("molecularProfiles${profile} not found"))
    })?;
    let assay_data = eset.slot("assayData").ok_or_else(|| {
        ExportError::Extraction(format!(
            "molecularProfiles${profile} is a {} without @assayData",
            eset.type_name()
        ))
    })?;
    let exprs = match assay_data {
        RObject::Environment(_) => set.rds.env_get(assay_data, "exprs"),
        other => other.list_get("exprs"),
    }
    .ok_or_else(|| {
        ExportError::Extraction(format!("molecularProfiles${profile} has no exprs matrix"))
    })?;
    Table::from_matrix(exprs)
}

pub fn extract_model(set: &XevaSet<'_>) -> Result<Table, ExportError> {
    Table::from_data_frame(set.slot("model")?)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpDesignRow {
    pub experiment: String,
    pub name: Option<String>,
    pub control: Option<String>,
    pub treatment: Option<String>,
}

pub fn exp_design_rows(set: &XevaSet<'_>) -> Result<Vec<ExpDesignRow>, ExportError> {
    let designs = set.slot("expDesign")?;
    let names = entry_names(designs, "expDesign")?;

    let mut rows = Vec::with_capacity(names.len());
    for key in names {
        let entry = lookup(designs, &key, "expDesign")?;
        if entry.list_entries().is_none() {
            return Err(ExportError::Extraction(format!(
                "expDesign[[{key}]] is {}, expected a list",
                entry.type_name()
            )));
        }
        rows.push(ExpDesignRow {
            name: first_string(entry.list_get("name")),
            control: first_string(entry.list_get("control")),
            treatment: first_string(entry.list_get("treatment")),
            experiment: key,
        });
    }
    Ok(rows)
}

pub fn extract_exp_design(set: &XevaSet<'_>) -> Result<Table, ExportError> {
    let rows = exp_design_rows(set)?;
    let mut experiment = Vec::with_capacity(rows.len());
    let mut name = Vec::with_capacity(rows.len());
    let mut control = Vec::with_capacity(rows.len());
    let mut treatment = Vec::with_capacity(rows.len());
    for row in rows {
        experiment.push(Cell::Text(row.experiment));
        name.push(Cell::from_optional(row.name));
        control.push(Cell::from_optional(row.control));
        treatment.push(Cell::from_optional(row.treatment));
    }
    Table::new(vec![
        Column::new(EXP_DESIGN_COLUMNS[0], experiment),
        Column::new(EXP_DESIGN_COLUMNS[1], name),
        Column::new(EXP_DESIGN_COLUMNS[2], control),
        Column::new(EXP_DESIGN_COLUMNS[3], treatment),
    ])
}

pub fn extract_experiment(set: &XevaSet<'_>) -> Result<Table, ExportError> {
    let experiments = set.slot("experiment")?;
    let names = entry_names(experiments, "experiment")?;

    let mut tables = Vec::with_capacity(names.len());
    for key in names {
        let model = lookup(experiments, &key, "experiment")?;
        let payload = required_slot(model, &key, "data")?;
        if payload.is_null() {
            tracing::warn!(experiment = %key, "experiment has no data; skipping");
            continue;
        }

        let mut table = if payload.is_data_frame() {
            Table::from_data_frame(payload)?
        } else if payload.dim().is_some() {
            Table::from_matrix(payload)?
        } else {
            return Err(ExportError::Extraction(format!(
                "experiment[[{key}]]@data is {}, expected a data.frame",
                payload.type_name()
            )));
        };

        let model_id = required_slot(model, &key, "model.id")?.first_as_string();
        let drug = drug_label(required_slot(model, &key, "drug")?);
        table.push_constant(EXPERIMENT_ID_COLUMNS[0], Cell::text(key.as_str()));
        table.push_constant(EXPERIMENT_ID_COLUMNS[1], Cell::from_optional(model_id));
        table.push_constant(EXPERIMENT_ID_COLUMNS[2], Cell::from_optional(drug));
        tables.push(table);
    }

    Ok(Table::concat(tables)?.unwrap_or_else(|| Table::empty(&EXPERIMENT_ID_COLUMNS)))
}

/// `drug$join.name` for Xeva's list-valued drug slot, else the first value.
fn drug_label(drug: &RObject) -> Option<String> {
    if drug.list_entries().is_some() && !drug.is_null() {
        if let Some(joined) = drug.list_get("join.name") {
            return joined.first_as_string();
        }
    }
    drug.first_as_string()
}

fn required_slot<'a>(
    model: &'a RObject,
    key: &str,
    slot: &str,
) -> Result<&'a RObject, ExportError> {
    model.slot(slot).ok_or_else(|| {
        ExportError::Extraction(format!(
            "experiment[[{key}]] is a {} without @{slot}",
            model.type_name()
        ))
    })
}

fn first_string(value: Option<&RObject>) -> Option<String> {
    value.and_then(RObject::first_as_string)
}

/// `names(x)`. NULL yields no entries; an unnamed element cannot be
/// addressed with `[[` and aborts the extraction.
fn entry_names(list: &RObject, slot: &str) -> Result<Vec<String>, ExportError> {
    if list.is_null() {
        return Ok(Vec::new());
    }
    if list.list_entries().is_none() {
        return Err(ExportError::Extraction(format!(
            "@{slot} is {}, expected a list",
            list.type_name()
        )));
    }
    let names = list.names().unwrap_or_else(|| vec![None; list.len()]);
    names
        .into_iter()
        .enumerate()
        .map(|(position, name)| match name {
            Some(name) if !name.is_empty() => Ok(name.to_string()),
            _ => Err(ExportError::Extraction(format!(
                "@{slot} element {} has no name",
                position + 1
            ))),
        })
        .collect()
}

/// `x[[key]]`: the first element carrying that name.
fn lookup<'a>(list: &'a RObject, key: &str, slot: &str) -> Result<&'a RObject, ExportError> {
    list.list_get(key)
        .ok_or_else(|| ExportError::Extraction(format!("@{slot}[[{key}]] not found")))
}
