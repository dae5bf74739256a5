// defs.rs — world model types shared by the persistence subsystem
//
// Everything here knows how to marshal itself with the fixed-width codec;
// the tag registry composes these into file sections.

use oubliette_common::marshal::{Reader, Writer};
use oubliette_common::{SaveError, SaveResult};

/// Grid dimensions of one dungeon level.
pub const GXM: usize = 80;
pub const GYM: usize = 70;

// ============================================================
// Coordinates
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Coord {
    pub x: i32,
    pub y: i32,
}

impl Coord {
    pub fn new(x: i32, y: i32) -> Coord {
        Coord { x, y }
    }

    pub fn in_bounds(&self) -> bool {
        self.x >= 0 && self.y >= 0 && (self.x as usize) < GXM && (self.y as usize) < GYM
    }

    pub fn adjacent(&self, other: &Coord) -> bool {
        *self != *other && (self.x - other.x).abs() <= 1 && (self.y - other.y).abs() <= 1
    }

    pub fn dist2(&self, other: &Coord) -> i64 {
        let dx = (self.x - other.x) as i64;
        let dy = (self.y - other.y) as i64;
        dx * dx + dy * dy
    }

    pub fn write(&self, w: &mut Writer) -> SaveResult<()> {
        w.write_i32(self.x)?;
        w.write_i32(self.y)
    }

    pub fn read(r: &mut Reader) -> SaveResult<Coord> {
        Ok(Coord {
            x: r.read_i32()?,
            y: r.read_i32()?,
        })
    }
}

// ============================================================
// Branches and level identity
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Branch {
    Main,
    Orc,
    Elf,
    Lair,
    Swamp,
    Vaults,
    Crypt,
    Tomb,
    VestibuleOfHell,
    Dis,
    Gehenna,
    Cocytus,
    Tartarus,
}

impl Branch {
    /// Single lowercase letter used in level file suffixes.
    pub fn letter(&self) -> char {
        match self {
            Branch::Main => 'a',
            Branch::Orc => 'o',
            Branch::Elf => 'e',
            Branch::Lair => 'l',
            Branch::Swamp => 's',
            Branch::Vaults => 'v',
            Branch::Crypt => 'c',
            Branch::Tomb => 't',
            Branch::VestibuleOfHell => 'h',
            Branch::Dis => 'd',
            Branch::Gehenna => 'g',
            Branch::Cocytus => 'x',
            Branch::Tartarus => 'y',
        }
    }

    pub fn is_hell(&self) -> bool {
        matches!(
            self,
            Branch::VestibuleOfHell
                | Branch::Dis
                | Branch::Gehenna
                | Branch::Cocytus
                | Branch::Tartarus
        )
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(v: u8) -> SaveResult<Branch> {
        Ok(match v {
            0 => Branch::Main,
            1 => Branch::Orc,
            2 => Branch::Elf,
            3 => Branch::Lair,
            4 => Branch::Swamp,
            5 => Branch::Vaults,
            6 => Branch::Crypt,
            7 => Branch::Tomb,
            8 => Branch::VestibuleOfHell,
            9 => Branch::Dis,
            10 => Branch::Gehenna,
            11 => Branch::Cocytus,
            12 => Branch::Tartarus,
            _ => {
                return Err(SaveError::InvalidValue {
                    what: "branch",
                    value: v as u32,
                })
            }
        })
    }

    pub fn all() -> &'static [Branch] {
        &[
            Branch::Main,
            Branch::Orc,
            Branch::Elf,
            Branch::Lair,
            Branch::Swamp,
            Branch::Vaults,
            Branch::Crypt,
            Branch::Tomb,
            Branch::VestibuleOfHell,
            Branch::Dis,
            Branch::Gehenna,
            Branch::Cocytus,
            Branch::Tartarus,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LevelType {
    Dungeon,
    Labyrinth,
    Abyss,
    Pandemonium,
    PortalVault,
}

impl LevelType {
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(v: u8) -> SaveResult<LevelType> {
        Ok(match v {
            0 => LevelType::Dungeon,
            1 => LevelType::Labyrinth,
            2 => LevelType::Abyss,
            3 => LevelType::Pandemonium,
            4 => LevelType::PortalVault,
            _ => {
                return Err(SaveError::InvalidValue {
                    what: "level type",
                    value: v as u32,
                })
            }
        })
    }

    /// Friendly creatures may cross into these level kinds with the player.
    pub fn allows_followers(&self) -> bool {
        matches!(self, LevelType::Dungeon | LevelType::Pandemonium)
    }
}

/// Identity of one level. `depth` is meaningful only for Dungeon levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LevelId {
    pub branch: Branch,
    pub depth: u8,
    pub level_type: LevelType,
}

impl LevelId {
    pub fn dungeon(branch: Branch, depth: u8) -> LevelId {
        LevelId {
            branch,
            depth,
            level_type: LevelType::Dungeon,
        }
    }

    /// Filename suffix code: two-digit depth plus branch letter for dungeon
    /// levels, fixed three-letter token otherwise.
    pub fn suffix(&self) -> String {
        match self.level_type {
            LevelType::Dungeon => format!("{:02}{}", self.depth, self.branch.letter()),
            LevelType::Labyrinth => "lab".to_string(),
            LevelType::Abyss => "abs".to_string(),
            LevelType::Pandemonium => "pan".to_string(),
            LevelType::PortalVault => "ptl".to_string(),
        }
    }

    pub fn write(&self, w: &mut Writer) -> SaveResult<()> {
        w.write_u8(self.branch.to_u8())?;
        w.write_u8(self.depth)?;
        w.write_u8(self.level_type.to_u8())
    }

    pub fn read(r: &mut Reader) -> SaveResult<LevelId> {
        Ok(LevelId {
            branch: Branch::from_u8(r.read_u8()?)?,
            depth: r.read_u8()?,
            level_type: LevelType::from_u8(r.read_u8()?)?,
        })
    }
}

// ============================================================
// Terrain features
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Feature {
    Floor = 0,
    RockWall,
    StoneArch,
    StoneStairsDownI,
    StoneStairsDownII,
    StoneStairsDownIII,
    EscapeHatchDown,
    StoneStairsUpI,
    StoneStairsUpII,
    StoneStairsUpIII,
    EscapeHatchUp,
    EnterHell,
    EnterAbyss,
    ExitAbyss,
    EnterPandemonium,
    ExitPandemonium,
    TransitPandemonium,
    EnterLabyrinth,
    EnterPortalVault,
    ExitPortalVault,
    EnterOrc,
    ReturnFromOrc,
    EnterElf,
    ReturnFromElf,
    EnterLair,
    ReturnFromLair,
    EnterVaults,
    ReturnFromVaults,
    EnterDis,
    EnterGehenna,
    EnterCocytus,
    EnterTartarus,
}

impl Feature {
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(v: u8) -> SaveResult<Feature> {
        use Feature::*;
        const TABLE: [Feature; 32] = [
            Floor,
            RockWall,
            StoneArch,
            StoneStairsDownI,
            StoneStairsDownII,
            StoneStairsDownIII,
            EscapeHatchDown,
            StoneStairsUpI,
            StoneStairsUpII,
            StoneStairsUpIII,
            EscapeHatchUp,
            EnterHell,
            EnterAbyss,
            ExitAbyss,
            EnterPandemonium,
            ExitPandemonium,
            TransitPandemonium,
            EnterLabyrinth,
            EnterPortalVault,
            ExitPortalVault,
            EnterOrc,
            ReturnFromOrc,
            EnterElf,
            ReturnFromElf,
            EnterLair,
            ReturnFromLair,
            EnterVaults,
            ReturnFromVaults,
            EnterDis,
            EnterGehenna,
            EnterCocytus,
            EnterTartarus,
        ];
        TABLE.get(v as usize).copied().ok_or(SaveError::InvalidValue {
            what: "terrain feature",
            value: v as u32,
        })
    }

    pub fn is_solid(&self) -> bool {
        matches!(self, Feature::RockWall)
    }

    /// Portals that get walled off behind an ascending player.
    pub fn is_sealable_portal(&self) -> bool {
        matches!(
            self,
            Feature::EnterHell
                | Feature::EnterAbyss
                | Feature::EnterPandemonium
                | Feature::EnterDis
                | Feature::EnterGehenna
                | Feature::EnterCocytus
                | Feature::EnterTartarus
        )
    }
}

// ============================================================
// Species and player redraw flags
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Species {
    Human,
    HillDwarf,
    DeepElf,
    Centaur,
    Spriggan,
    Mummy,
    Ghoul,
}

impl Species {
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(v: u8) -> SaveResult<Species> {
        Ok(match v {
            0 => Species::Human,
            1 => Species::HillDwarf,
            2 => Species::DeepElf,
            3 => Species::Centaur,
            4 => Species::Spriggan,
            5 => Species::Mummy,
            6 => Species::Ghoul,
            _ => {
                return Err(SaveError::InvalidValue {
                    what: "species",
                    value: v as u32,
                })
            }
        })
    }

    /// Undead characters leave no remains for bones files.
    pub fn is_undead(&self) -> bool {
        matches!(self, Species::Mummy | Species::Ghoul)
    }

    /// Species with a flat arrival-cost override on stairs.
    pub fn is_stair_clumsy(&self) -> bool {
        matches!(self, Species::Centaur)
    }
}

bitflags::bitflags! {
    /// Status-line recomputation flags, set after a restore so the UI layer
    /// refreshes everything derived from loaded state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RedrawFlags: u32 {
        const HIT_POINTS = 1 << 0;
        const STATS      = 1 << 1;
        const ARMOUR     = 1 << 2;
        const EVASION    = 1 << 3;
        const EXPERIENCE = 1 << 4;
        const GOLD       = 1 << 5;
    }
}

// ============================================================
// Monsters
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonsterKind {
    Rat,
    Jackal,
    Goblin,
    Hobgoblin,
    OrcWarrior,
    Ogre,
    Wyvern,
    PlayerGhost,
    PandemoniumDemon,
}

impl MonsterKind {
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(v: u8) -> SaveResult<MonsterKind> {
        Ok(match v {
            0 => MonsterKind::Rat,
            1 => MonsterKind::Jackal,
            2 => MonsterKind::Goblin,
            3 => MonsterKind::Hobgoblin,
            4 => MonsterKind::OrcWarrior,
            5 => MonsterKind::Ogre,
            6 => MonsterKind::Wyvern,
            7 => MonsterKind::PlayerGhost,
            8 => MonsterKind::PandemoniumDemon,
            _ => {
                return Err(SaveError::InvalidValue {
                    what: "monster kind",
                    value: v as u32,
                })
            }
        })
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MonsterFlags: u32 {
        /// Tagged to follow the player through a level change.
        const TAKING_STAIRS = 1 << 0;
        const FRIENDLY      = 1 << 1;
        const BANISHED      = 1 << 2;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Monster {
    pub kind: MonsterKind,
    pub pos: Coord,
    pub hp: i32,
    pub max_hp: i32,
    pub flags: MonsterFlags,
    /// Indices into the level item table for carried items.
    pub items: Vec<u16>,
}

impl Monster {
    pub fn new(kind: MonsterKind, pos: Coord, hp: i32) -> Monster {
        Monster {
            kind,
            pos,
            hp,
            max_hp: hp,
            flags: MonsterFlags::empty(),
            items: Vec::new(),
        }
    }

    pub fn alive(&self) -> bool {
        self.hp > 0
    }

    pub fn write(&self, w: &mut Writer) -> SaveResult<()> {
        w.write_u8(self.kind.to_u8())?;
        self.pos.write(w)?;
        w.write_i32(self.hp)?;
        w.write_i32(self.max_hp)?;
        w.write_u32(self.flags.bits())?;
        w.write_u8(self.items.len() as u8)?;
        for &idx in &self.items {
            w.write_u16(idx)?;
        }
        Ok(())
    }

    pub fn read(r: &mut Reader) -> SaveResult<Monster> {
        let kind = MonsterKind::from_u8(r.read_u8()?)?;
        let pos = Coord::read(r)?;
        let hp = r.read_i32()?;
        let max_hp = r.read_i32()?;
        let flags = MonsterFlags::from_bits_truncate(r.read_u32()?);
        let nitems = r.read_u8()? as usize;
        let mut items = Vec::with_capacity(nitems);
        for _ in 0..nitems {
            items.push(r.read_u16()?);
        }
        Ok(Monster {
            kind,
            pos,
            hp,
            max_hp,
            flags,
            items,
        })
    }
}

// ============================================================
// Items
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Weapon,
    Armour,
    Potion,
    Scroll,
    Wand,
    Gold,
    Corpse,
    Misc,
}

impl ItemKind {
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(v: u8) -> SaveResult<ItemKind> {
        Ok(match v {
            0 => ItemKind::Weapon,
            1 => ItemKind::Armour,
            2 => ItemKind::Potion,
            3 => ItemKind::Scroll,
            4 => ItemKind::Wand,
            5 => ItemKind::Gold,
            6 => ItemKind::Corpse,
            7 => ItemKind::Misc,
            _ => {
                return Err(SaveError::InvalidValue {
                    what: "item kind",
                    value: v as u32,
                })
            }
        })
    }
}

/// One item stack. `pos` is None while held by the player or a monster.
/// `link` chains floor items sharing a cell; it is rebuilt after every load
/// because the indices are not portable across save boundaries.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub kind: ItemKind,
    pub quantity: u16,
    /// Rot clock for corpses; ignored for everything else.
    pub age: i32,
    pub pos: Option<Coord>,
    pub link: Option<u16>,
}

impl Item {
    pub fn floor(kind: ItemKind, pos: Coord) -> Item {
        Item {
            kind,
            quantity: 1,
            age: 0,
            pos: Some(pos),
            link: None,
        }
    }

    pub fn held(kind: ItemKind) -> Item {
        Item {
            kind,
            quantity: 1,
            age: 0,
            pos: None,
            link: None,
        }
    }

    pub fn write(&self, w: &mut Writer) -> SaveResult<()> {
        w.write_u8(self.kind.to_u8())?;
        w.write_u16(self.quantity)?;
        w.write_i32(self.age)?;
        match self.pos {
            Some(pos) => {
                w.write_bool(true)?;
                pos.write(w)?;
            }
            None => w.write_bool(false)?,
        }
        w.write_i32(self.link.map(|l| l as i32).unwrap_or(-1))
    }

    pub fn read(r: &mut Reader) -> SaveResult<Item> {
        let kind = ItemKind::from_u8(r.read_u8()?)?;
        let quantity = r.read_u16()?;
        let age = r.read_i32()?;
        let pos = if r.read_bool()? {
            Some(Coord::read(r)?)
        } else {
            None
        };
        let link = match r.read_i32()? {
            n if n < 0 => None,
            n => Some(n as u16),
        };
        Ok(Item {
            kind,
            quantity,
            age,
            pos,
            link,
        })
    }
}

// ============================================================
// Clouds and markers
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudKind {
    Fire,
    Cold,
    Poison,
    Smoke,
}

impl CloudKind {
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(v: u8) -> SaveResult<CloudKind> {
        Ok(match v {
            0 => CloudKind::Fire,
            1 => CloudKind::Cold,
            2 => CloudKind::Poison,
            3 => CloudKind::Smoke,
            _ => {
                return Err(SaveError::InvalidValue {
                    what: "cloud kind",
                    value: v as u32,
                })
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cloud {
    pub pos: Coord,
    pub kind: CloudKind,
    pub decay: i32,
}

impl Cloud {
    pub fn write(&self, w: &mut Writer) -> SaveResult<()> {
        self.pos.write(w)?;
        w.write_u8(self.kind.to_u8())?;
        w.write_i32(self.decay)
    }

    pub fn read(r: &mut Reader) -> SaveResult<Cloud> {
        Ok(Cloud {
            pos: Coord::read(r)?,
            kind: CloudKind::from_u8(r.read_u8()?)?,
            decay: r.read_i32()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub pos: Coord,
    pub auto_activate: bool,
    pub activated: bool,
    pub note: String,
}

impl Marker {
    pub fn write(&self, w: &mut Writer) -> SaveResult<()> {
        self.pos.write(w)?;
        w.write_bool(self.auto_activate)?;
        w.write_bool(self.activated)?;
        w.write_string(&self.note)
    }

    pub fn read(r: &mut Reader) -> SaveResult<Marker> {
        Ok(Marker {
            pos: Coord::read(r)?,
            auto_activate: r.read_bool()?,
            activated: r.read_bool()?,
            note: r.read_string()?,
        })
    }
}

// ============================================================
// Ghost records
// ============================================================

#[derive(Debug, Clone, PartialEq)]
pub struct GhostRecord {
    pub name: String,
    pub species: Species,
    pub xl: u8,
    pub max_hp: i32,
    pub damage: i32,
}

impl GhostRecord {
    pub fn write(&self, w: &mut Writer) -> SaveResult<()> {
        w.write_string(&self.name)?;
        w.write_u8(self.species.to_u8())?;
        w.write_u8(self.xl)?;
        w.write_i32(self.max_hp)?;
        w.write_i32(self.damage)
    }

    pub fn read(r: &mut Reader) -> SaveResult<GhostRecord> {
        Ok(GhostRecord {
            name: r.read_string()?,
            species: Species::from_u8(r.read_u8()?)?,
            xl: r.read_u8()?,
            max_hp: r.read_i32()?,
            damage: r.read_i32()?,
        })
    }
}

// ============================================================
// Visit statistics
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaceInfo {
    pub num_visits: u32,
    pub levels_seen: u32,
}

impl PlaceInfo {
    /// A place can't have seen levels without ever being visited.
    pub fn assert_validity(&self) {
        assert!(
            self.num_visits > 0 || self.levels_seen == 0,
            "place info inconsistent: {} levels seen across {} visits",
            self.levels_seen,
            self.num_visits
        );
    }

    pub fn write(&self, w: &mut Writer) -> SaveResult<()> {
        w.write_u32(self.num_visits)?;
        w.write_u32(self.levels_seen)
    }

    pub fn read(r: &mut Reader) -> SaveResult<PlaceInfo> {
        Ok(PlaceInfo {
            num_visits: r.read_u32()?,
            levels_seen: r.read_u32()?,
        })
    }
}

impl std::ops::AddAssign for PlaceInfo {
    fn add_assign(&mut self, rhs: PlaceInfo) {
        self.num_visits += rhs.num_visits;
        self.levels_seen += rhs.levels_seen;
    }
}
