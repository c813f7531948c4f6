//! Sheet name registry.

use indexmap::IndexMap;

use super::SheetId;

/// Resolves sheet names in formulas (`Data!A1`) to sheet ids.
pub trait SheetResolver {
    fn resolve_sheet(&self, name: &str) -> Option<SheetId>;
}

/// Sheets of one workbook, in creation order.
///
/// Lookups are case-insensitive; the display name keeps its original case.
#[derive(Debug, Clone, Default)]
pub struct SheetTable {
    /// Upper-cased name -> (display name, id).
    by_name: IndexMap<String, (String, SheetId)>,
}

impl SheetTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sheet, or return the existing id if the name is taken.
    pub fn add(&mut self, name: &str) -> SheetId {
        let key = name.to_uppercase();
        if let Some((_, id)) = self.by_name.get(&key) {
            return *id;
        }
        let id = SheetId(self.by_name.len() as u32);
        self.by_name.insert(key, (name.to_string(), id));
        id
    }

    pub fn id(&self, name: &str) -> Option<SheetId> {
        self.by_name.get(&name.to_uppercase()).map(|(_, id)| *id)
    }

    pub fn name(&self, id: SheetId) -> Option<&str> {
        self.by_name
            .get_index(id.0 as usize)
            .map(|(_, (name, _))| name.as_str())
    }

    pub fn contains(&self, id: SheetId) -> bool {
        (id.0 as usize) < self.by_name.len()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Display names in id order.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.by_name.values().map(|(name, _)| name.as_str())
    }
}

impl SheetResolver for SheetTable {
    fn resolve_sheet(&self, name: &str) -> Option<SheetId> {
        self.id(name)
    }
}

/// Resolver that knows no sheets; qualified references become `#REF!`.
pub struct NoSheets;

impl SheetResolver for NoSheets {
    fn resolve_sheet(&self, _name: &str) -> Option<SheetId> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sheet_ids_follow_creation_order() {
        let mut sheets = SheetTable::new();
        assert_eq!(sheets.add("Sheet1"), SheetId(0));
        assert_eq!(sheets.add("Data"), SheetId(1));
        assert_eq!(sheets.add("DATA"), SheetId(1));
        assert_eq!(sheets.len(), 2);
        assert_eq!(sheets.name(SheetId(1)), Some("Data"));
        assert_eq!(sheets.resolve_sheet("data"), Some(SheetId(1)));
        assert_eq!(sheets.names().collect::<Vec<_>>(), vec!["Sheet1", "Data"]);
    }
}
