//! Assembly of column groups and base folding.

use indexmap::IndexMap;

use super::{
    coldefs::in_base_family,
    schema::{ColumnDescriptor, ColumnGroup},
};

/// Display name of a synthesized `base` group.
pub const BASE_DISPLAYNAME: &str = "Base Information";

/// Build the groups of a level from its annotator table rows (ordered by name).
///
/// `base` comes first, then the modules merged into it, then all other modules.
pub fn sorted_groups(
    annotators: &[(String, String)],
    merge_into_base: &[String],
) -> Vec<ColumnGroup> {
    let mut groups = Vec::with_capacity(annotators.len() + 1);
    match annotators.iter().find(|(name, _)| name == "base") {
        Some((name, displayname)) => {
            groups.push(ColumnGroup::new(name.clone(), displayname.clone()))
        }
        None => groups.push(ColumnGroup::new("base".into(), BASE_DISPLAYNAME.into())),
    }
    for (name, displayname) in annotators {
        if merge_into_base.contains(name) {
            groups.push(ColumnGroup::new(name.clone(), displayname.clone()));
        }
    }
    for (name, displayname) in annotators {
        if name != "base" && !merge_into_base.contains(name) {
            groups.push(ColumnGroup::new(name.clone(), displayname.clone()));
        }
    }
    groups
}

/// Count the columns of each group, adding groups for modules missing from the annotator table.
pub fn count_columns(groups: &mut Vec<ColumnGroup>, columns: &[ColumnDescriptor]) {
    for col in columns {
        let module = col.module();
        match groups.iter_mut().find(|grp| grp.name == module) {
            Some(grp) => grp.count += 1,
            None => {
                tracing::debug!("synthesizing column group for module {}", module);
                let mut grp = ColumnGroup::new(module.to_string(), module.to_string());
                grp.count = 1;
                groups.push(grp);
            }
        }
    }
}

/// Result of folding merge-into-base modules into `base`.
#[derive(Debug, Clone, PartialEq)]
pub struct Folded {
    pub groups: Vec<ColumnGroup>,
    pub columns: Vec<ColumnDescriptor>,
    /// Report column name to original database column name.
    pub renames: IndexMap<String, String>,
}

/// Fold the merge-into-base groups into `base` and order the columns like the groups.
///
/// Groups are placed `base` first, then the modules in `priority`, then the rest in their
/// current order.  Columns of merged modules are renamed `base__<field>`; a renamed column
/// colliding with an existing name is dropped.  `lastcol` is set to the running column count.
pub fn fold_into_base(
    groups: Vec<ColumnGroup>,
    columns: Vec<ColumnDescriptor>,
    merge_into_base: &[String],
    priority: &[String],
) -> Folded {
    let existing = columns.iter().map(|c| c.name.clone()).collect::<Vec<_>>();
    let mut renames = IndexMap::new();
    let mut kept = Vec::with_capacity(columns.len());
    let mut dropped = 0;
    for mut col in columns {
        if in_base_family(&col.name, merge_into_base) {
            col.in_base = true;
            if col.module() != "base" {
                let new_name = format!("base__{}", col.field());
                if existing.contains(&new_name) || renames.contains_key(&new_name) {
                    tracing::warn!(
                        "column {} would be renamed to existing {}, dropping it",
                        &col.name,
                        &new_name
                    );
                    dropped += 1;
                    continue;
                }
                renames.insert(new_name.clone(), col.name.clone());
                col.name = new_name;
            }
        }
        kept.push(col);
    }

    let mut rest = groups;
    let mut base = match rest.iter().position(|grp| grp.name == "base") {
        Some(idx) => rest.remove(idx),
        None => ColumnGroup::new("base".into(), BASE_DISPLAYNAME.into()),
    };
    rest.retain(|grp| {
        if merge_into_base.contains(&grp.name) {
            base.count += grp.count;
            false
        } else {
            true
        }
    });
    base.count = base.count.saturating_sub(dropped);
    let mut ordered = vec![base];
    for name in priority {
        if let Some(idx) = rest.iter().position(|grp| &grp.name == name) {
            ordered.push(rest.remove(idx));
        }
    }
    ordered.extend(rest);

    let mut new_columns = Vec::with_capacity(kept.len());
    for grp in &ordered {
        for col in &kept {
            let belongs = if grp.name == "base" {
                col.in_base
            } else {
                !col.in_base && col.module() == grp.name
            };
            if belongs {
                new_columns.push(col.clone());
            }
        }
    }

    let mut lastcol = 0;
    for grp in ordered.iter_mut() {
        lastcol += grp.count;
        grp.lastcol = lastcol;
    }

    Folded {
        groups: ordered,
        columns: new_columns,
        renames,
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::report::schema::{Level, RawColumnDef};

    fn col(name: &str) -> ColumnDescriptor {
        ColumnDescriptor::from_raw(
            RawColumnDef {
                name: name.into(),
                ..Default::default()
            },
            Level::Variant,
        )
        .expect("valid column")
    }

    fn annotators(names: &[&str]) -> Vec<(String, String)> {
        names
            .iter()
            .map(|n| (n.to_string(), n.to_uppercase()))
            .collect()
    }

    fn merge() -> Vec<String> {
        vec!["mapper".to_string(), "tagsampler".to_string()]
    }

    #[test]
    fn base_first_then_merged_then_rest() {
        let groups = sorted_groups(
            &annotators(&["aaa", "base", "clinvar", "mapper", "tagsampler"]),
            &merge(),
        );

        assert_eq!(
            groups.iter().map(|g| g.name.as_str()).collect::<Vec<_>>(),
            vec!["base", "mapper", "tagsampler", "aaa", "clinvar"]
        );
    }

    #[test]
    fn missing_base_is_synthesized() {
        let groups = sorted_groups(&annotators(&["clinvar"]), &merge());

        assert_eq!(groups[0], ColumnGroup::new("base".into(), BASE_DISPLAYNAME.into()));
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn fold_counts_and_renames() {
        let mut groups = sorted_groups(
            &annotators(&["base", "clinvar", "mapper", "tagsampler"]),
            &merge(),
        );
        let columns = vec![
            col("base__uid"),
            col("base__hugo"),
            col("mapper__so"),
            col("tagsampler__numsample"),
            col("clinvar__sig"),
        ];
        count_columns(&mut groups, &columns);

        let folded = fold_into_base(groups, columns, &merge(), &[]);

        assert_eq!(
            folded
                .groups
                .iter()
                .map(|g| (g.name.as_str(), g.count, g.lastcol))
                .collect::<Vec<_>>(),
            vec![("base", 4, 4), ("clinvar", 1, 5)]
        );
        assert_eq!(
            folded.columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            vec![
                "base__uid",
                "base__hugo",
                "base__so",
                "base__numsample",
                "clinvar__sig"
            ]
        );
        assert_eq!(
            folded.renames.get("base__so").map(String::as_str),
            Some("mapper__so")
        );
        assert!(folded.columns[2].in_base);
    }

    #[test]
    fn priority_order_and_orphans() {
        let mut groups = sorted_groups(&annotators(&["base", "aaa", "zzz"]), &merge());
        let columns = vec![
            col("zzz__x"),
            col("base__uid"),
            col("aaa__y"),
            col("orphan__z"),
        ];
        count_columns(&mut groups, &columns);

        let folded = fold_into_base(groups, columns, &merge(), &["zzz".to_string()]);

        assert_eq!(
            folded
                .groups
                .iter()
                .map(|g| (g.name.as_str(), g.lastcol))
                .collect::<Vec<_>>(),
            vec![("base", 1), ("zzz", 2), ("aaa", 3), ("orphan", 4)]
        );
        assert_eq!(
            folded.columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            vec!["base__uid", "zzz__x", "aaa__y", "orphan__z"]
        );
    }

    #[test]
    fn colliding_fold_keeps_first() {
        let mut groups = sorted_groups(&annotators(&["base", "mapper"]), &merge());
        let columns = vec![col("base__so"), col("mapper__so")];
        count_columns(&mut groups, &columns);

        let folded = fold_into_base(groups, columns, &merge(), &[]);

        assert_eq!(folded.columns.len(), 1);
        assert_eq!(folded.groups[0].count, 1);
        assert!(folded.renames.is_empty());
    }
}
