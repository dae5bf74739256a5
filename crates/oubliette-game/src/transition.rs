// transition.rs — the level change state machine
//
// enter_level() is the one door between levels: the origin level is saved
// (or abandoned), the destination is restored from disk or generated, and
// everything in transit — the player, followers, banished monsters, thrown
// items — lands on the far side in a consistent order.

use std::fs;

use oubliette_common::files::file_exists;
use oubliette_common::message::mpr;
use oubliette_common::SaveResult;

use crate::defs::*;
use crate::saveload::{level_file_path, load_ghost, save_level};
use crate::session::{Direction, Follower, GameSession, LevelEnv, LevelEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// First level of a new game.
    StartGame,
    /// Normal stair traversal.
    EnterLevel,
    /// Re-entry after restoring a saved game; no world changes.
    RestartGame,
    /// Peek at another level on behalf of apply_to_level; no world changes.
    Visitor,
}

impl LoadMode {
    fn makes_changes(&self) -> bool {
        matches!(self, LoadMode::StartGame | LoadMode::EnterLevel)
    }
}

/// Move the game onto the level named by the session's current place.
/// `old_level` is where the player came from, None for a fresh start.
/// Returns whether the destination had to be generated.
pub fn enter_level(
    sess: &mut GameSession,
    stair_taken: Feature,
    load_mode: LoadMode,
    old_level: Option<LevelId>,
) -> SaveResult<bool> {
    sess.you.transit_stair = stair_taken;
    sess.you.entering_level = true;
    let result = enter_level_inner(sess, stair_taken, load_mode, old_level);
    sess.you.entering_level = false;
    result
}

fn enter_level_inner(
    sess: &mut GameSession,
    stair_taken: Feature,
    load_mode: LoadMode,
    old_level: Option<LevelId>,
) -> SaveResult<bool> {
    let make_changes = load_mode.makes_changes();
    let current = sess.you.level_id();
    let path = level_file_path(sess, &current);

    // A file left over from an earlier game must not be mistaken for this
    // one; the first genuine visit to a dungeon level clears it.
    let from_dungeon = old_level.map_or(false, |o| o.level_type == LevelType::Dungeon);
    if (current.level_type == LevelType::Dungeon && from_dungeon)
        || load_mode == LoadMode::StartGame
    {
        if !sess.visited.contains(&current) {
            if file_exists(&path) {
                let _ = fs::remove_file(&path);
            }
            sess.visited.mark(current);
        }
    }

    assert!(
        load_mode != LoadMode::Visitor || file_exists(&path),
        "visitor load of a level that has no file"
    );

    if make_changes {
        sess.env.clear_clouds();
    }
    sess.events.clear();

    if load_mode == LoadMode::EnterLevel {
        if let Some(old) = old_level {
            grab_followers(sess);
            if old.level_type == LevelType::Dungeon {
                save_level(sess, &old)?;
            }
        }
    }

    if make_changes {
        if let Some(old) = old_level {
            do_lost_items(sess, old.level_type);
        }
    }

    // From here on the environment belongs to the destination.
    sess.env = LevelEnv::default();

    let mut just_created = false;
    if !file_exists(&path) {
        sess.env.turns_on_level = -1;
        let builder = sess.builder;
        builder(&current, &mut sess.env, &mut sess.rng);
        just_created = true;

        let deep_enough = current.level_type != LevelType::Dungeon
            || current.depth >= sess.config.bones_min_depth;
        let chance = sess.config.ghost_chance;
        if deep_enough && sess.one_chance_in(chance) {
            load_ghost(sess);
        }

        sess.env.turns_on_level = 0;
    } else {
        crate::saveload::restore_level(sess, &path)?;
        sess.env.link_items();
    }

    if load_mode == LoadMode::StartGame {
        just_created = true;
    }

    if make_changes
        && sess.you.char_direction == Direction::Ascending
        && sess.you.level_type != LevelType::Pandemonium
    {
        close_level_gates(sess);
    }

    if just_created {
        sess.env.clear_map();
    }

    if make_changes {
        sess.env.clear_clouds();
        if sess.you.level_type == LevelType::Abyss {
            let center = Coord::new(GXM as i32 / 2, GYM as i32 / 2);
            sess.you.pos = sess.env.nearest_floor(center, false).unwrap_or(center);
        } else {
            let old_branch = old_level.map(|o| o.branch).unwrap_or(sess.you.branch);
            place_player_on_stair(sess, old_branch, stair_taken);
        }
    }

    // The arrival cell belongs to the player; whoever was standing there
    // gets shoved aside.
    if let Some(idx) = sess.env.monster_at(sess.you.pos) {
        displace_monster(sess, idx);
    }

    if make_changes
        && load_mode == LoadMode::EnterLevel
        && sess.you.level_type.allows_followers()
    {
        place_followers(sess);
    }

    if load_mode == LoadMode::EnterLevel {
        place_transiting_monsters(sess);
        place_transiting_items(sess);
    }

    sess.you.redraw_all();
    sess.env.fix_item_coordinates();

    if load_mode != LoadMode::Visitor {
        sess.events.fire(LevelEvent::EnteringLevel);
    }

    if load_mode == LoadMode::EnterLevel {
        if just_created {
            mpr("You enter an unexplored area.");
        }

        for marker in sess.env.markers.iter_mut() {
            if marker.auto_activate && !marker.activated {
                marker.activated = true;
            }
        }

        // The level slept while the player was away; catch its clock up.
        let away = sess.you.elapsed_time - sess.env.elapsed_time;
        if !just_created && sess.env.elapsed_time != 0 && away > 0 {
            update_level(sess, away);
        }

        let mut timeval = if sess.you.species.is_stair_clumsy() {
            sess.config.clumsy_stair_cost
        } else {
            sess.config.base_move_cost
        };
        if just_created {
            timeval /= 2;
        }
        timeval -= sess.you.stealth / sess.config.stealth_cost_divisor;
        if timeval > 0 {
            sess.you.time_taken = timeval;
            sess.you.elapsed_time += timeval;
            let ai = sess.monster_ai;
            ai(&mut sess.env, &mut sess.rng);
        }
    }

    if make_changes {
        save_level(sess, &current)?;
    }

    setup_environment_effects(sess);

    if make_changes {
        let entered_place = load_mode == LoadMode::StartGame
            || old_level.map_or(false, |o| {
                o.branch != sess.you.branch || o.level_type != sess.you.level_type
            });
        let delta = PlaceInfo {
            num_visits: entered_place as u32,
            levels_seen: just_created as u32,
        };
        sess.you.global_info += delta;
        sess.you.global_info.assert_validity();
        let place = sess.you.place_info_mut();
        *place += delta;
        place.assert_validity();
    }

    if just_created {
        sess.you.abyss_entourage = 0;
    }

    if load_mode != LoadMode::Visitor {
        sess.events.fire(LevelEvent::EnteredLevel);
    }

    Ok(just_created)
}

// ============================================================
// Followers
// ============================================================

/// Sweep up friendlies adjacent to the player (and chained through each
/// other) that are tagged for the stairs, and stash them for the
/// destination. Everything left behind loses the tag.
fn grab_followers(sess: &mut GameSession) {
    let destination = sess.you.level_id();

    // A badly wounded ghost next to the player slips away before anyone
    // is rounded up, whatever its disposition and wherever the stairs lead.
    for idx in 0..sess.env.monsters.len() {
        let m = &sess.env.monsters[idx];
        if m.alive()
            && m.kind == MonsterKind::PlayerGhost
            && m.pos.adjacent(&sess.you.pos)
            && m.hp * 2 < m.max_hp
        {
            mpr("The ghost fades into the shadows.");
            displace_monster(sess, idx);
            sess.env.monsters[idx]
                .flags
                .remove(MonsterFlags::TAKING_STAIRS);
        }
    }

    if !sess.you.level_type.allows_followers() {
        for m in sess.env.monsters.iter_mut() {
            m.flags.remove(MonsterFlags::TAKING_STAIRS);
        }
        return;
    }

    let mut frontier = vec![sess.you.pos];
    let mut grabbed: Vec<usize> = Vec::new();

    while let Some(at) = frontier.pop() {
        for idx in 0..sess.env.monsters.len() {
            if grabbed.contains(&idx) {
                continue;
            }
            let m = &sess.env.monsters[idx];
            if !m.alive()
                || !m.pos.adjacent(&at)
                || !m.flags.contains(MonsterFlags::FRIENDLY)
                || !m.flags.contains(MonsterFlags::TAKING_STAIRS)
            {
                continue;
            }

            frontier.push(m.pos);
            grabbed.push(idx);
        }
    }

    grabbed.sort_unstable();
    for &idx in grabbed.iter().rev() {
        let follower = Follower::extract(&mut sess.env, idx);
        sess.followers.entry(destination).or_default().push(follower);
    }

    for m in sess.env.monsters.iter_mut() {
        m.flags.remove(MonsterFlags::TAKING_STAIRS);
    }
}

fn place_followers(sess: &mut GameSession) {
    let current = sess.you.level_id();
    let arrivals = match sess.followers.remove(&current) {
        Some(list) => list,
        None => return,
    };

    for follower in arrivals {
        let spot = match sess.env.nearest_floor(sess.you.pos, true) {
            Some(s) => s,
            None => continue,
        };
        let mut monster = follower.monster;
        monster.pos = spot;
        monster.items.clear();
        for item in follower.carried {
            sess.env.items.push(item);
            monster.items.push((sess.env.items.len() - 1) as u16);
        }
        sess.env.monsters.push(monster);
    }
}

fn place_transiting_monsters(sess: &mut GameSession) {
    let current = sess.you.level_id();
    let arrivals = match sess.transit_monsters.remove(&current) {
        Some(list) => list,
        None => return,
    };
    for mut monster in arrivals {
        if let Some(spot) = sess.env.nearest_floor(sess.you.pos, true) {
            monster.pos = spot;
            monster.items.clear();
            sess.env.monsters.push(monster);
        }
    }
}

fn place_transiting_items(sess: &mut GameSession) {
    let current = sess.you.level_id();
    let arrivals = match sess.transit_items.remove(&current) {
        Some(list) => list,
        None => return,
    };
    for mut item in arrivals {
        if let Some(spot) = sess.env.nearest_floor(sess.you.pos, false) {
            item.pos = Some(spot);
            item.link = None;
            sess.env.items.push(item);
        }
    }
    sess.env.link_items();
}

// ============================================================
// Arrival placement
// ============================================================

/// What feature the player should arrive on, given the stair they left by.
fn stair_destination(sess: &GameSession, old_branch: Branch, stair: Feature) -> Feature {
    // Climbing out of the Vestibule lands back at the hell gate.
    if sess.you.level_type == LevelType::Dungeon
        && old_branch == Branch::VestibuleOfHell
        && stair == Feature::StoneStairsUpI
    {
        return Feature::EnterHell;
    }

    match stair {
        Feature::StoneStairsDownI => Feature::StoneStairsUpI,
        Feature::StoneStairsDownII => Feature::StoneStairsUpII,
        Feature::StoneStairsDownIII => Feature::StoneStairsUpIII,
        Feature::StoneStairsUpI => Feature::StoneStairsDownI,
        Feature::StoneStairsUpII => Feature::StoneStairsDownII,
        Feature::StoneStairsUpIII => Feature::StoneStairsDownIII,

        Feature::EnterOrc => Feature::ReturnFromOrc,
        Feature::EnterElf => Feature::ReturnFromElf,
        Feature::EnterLair => Feature::ReturnFromLair,
        Feature::EnterVaults => Feature::ReturnFromVaults,
        Feature::ReturnFromOrc => Feature::EnterOrc,
        Feature::ReturnFromElf => Feature::EnterElf,
        Feature::ReturnFromLair => Feature::EnterLair,
        Feature::ReturnFromVaults => Feature::EnterVaults,

        // Hell branch gates drop the player at the top staircase.
        Feature::EnterDis
        | Feature::EnterGehenna
        | Feature::EnterCocytus
        | Feature::EnterTartarus => Feature::StoneStairsUpI,
        Feature::EnterHell => Feature::StoneArch,

        Feature::ExitAbyss => Feature::EnterAbyss,
        Feature::ExitPandemonium => Feature::EnterPandemonium,
        Feature::ExitPortalVault => Feature::EnterPortalVault,
        Feature::EnterPortalVault => Feature::StoneArch,

        // Hatches and everything else dump the player on open floor.
        _ => Feature::Floor,
    }
}

fn place_player_on_stair(sess: &mut GameSession, old_branch: Branch, stair_taken: Feature) {
    let target = stair_destination(sess, old_branch, stair_taken);
    let near = if sess.you.pos.in_bounds() {
        sess.you.pos
    } else {
        Coord::new(GXM as i32 / 2, GYM as i32 / 2)
    };

    let pos = sess
        .env
        .find_feature(target, near)
        .or_else(|| sess.env.nearest_floor(near, false))
        .unwrap_or(near);
    sess.you.pos = pos;
}

fn displace_monster(sess: &mut GameSession, idx: usize) {
    let player = sess.you.pos;
    let from = sess.env.monsters[idx].pos;
    // Prefer a cell adjacent to where it stood; fall back to anywhere open.
    let mut spot = None;
    for dy in -1..=1 {
        for dx in -1..=1 {
            let cand = Coord::new(from.x + dx, from.y + dy);
            if cand == from || cand == player || !cand.in_bounds() {
                continue;
            }
            if sess.env.at(cand) == Feature::Floor && sess.env.monster_at(cand).is_none() {
                spot = Some(cand);
            }
        }
    }
    let spot = spot.or_else(|| {
        sess.env
            .nearest_floor(from, true)
            .filter(|&c| c != player)
    });
    if let Some(spot) = spot {
        sess.env.monsters[idx].pos = spot;
    }
}

// ============================================================
// Level-wide sweeps
// ============================================================

/// Items on the floor of a collapsing level (anything that isn't a proper
/// dungeon level) are gone for good; record the loss.
fn do_lost_items(sess: &mut GameSession, old_type: LevelType) {
    if old_type == LevelType::Dungeon {
        return;
    }
    let lost = sess
        .env
        .items
        .iter()
        .filter(|i| i.pos.is_some() && i.quantity > 0)
        .count() as u32;
    sess.you.items_lost += lost;
}

/// Wall off the one-way portals behind an ascending player.
fn close_level_gates(sess: &mut GameSession) {
    let mut sealed = false;
    for y in 0..GYM as i32 {
        for x in 0..GXM as i32 {
            let pos = Coord::new(x, y);
            if sess.env.at(pos).is_sealable_portal() {
                sess.env.set(pos, Feature::StoneArch);
                sess.env.markers.retain(|m| m.pos != pos);
                sealed = true;
            }
        }
    }
    if sealed {
        mpr("The air shimmers as gates seal themselves behind you.");
    }
}

/// Fast-forward a restored level by the time the player spent elsewhere:
/// corpses rot away, clouds dissipate, the level's turn counter advances.
fn update_level(sess: &mut GameSession, elapsed: i32) {
    for item in sess.env.items.iter_mut() {
        if item.kind == ItemKind::Corpse {
            item.age -= elapsed;
            if item.age <= 0 {
                item.quantity = 0;
                item.pos = None;
            }
        }
    }
    sess.env.items.retain(|i| i.quantity > 0);
    sess.env.link_items();

    for cloud in sess.env.clouds.iter_mut() {
        cloud.decay -= elapsed;
    }
    sess.env.clouds.retain(|c| c.decay > 0);

    sess.env.turns_on_level += elapsed / 10;
}

/// Recompute ambient state derived from the player's position.
fn setup_environment_effects(sess: &mut GameSession) {
    let p = sess.you.pos;
    for dy in -1..=1 {
        for dx in -1..=1 {
            let c = Coord::new(p.x + dx, p.y + dy);
            if c.in_bounds() {
                sess.env.map_seen[c.y as usize * GXM + c.x as usize] = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SaveConfig;
    use tempfile::TempDir;

    fn make_test_session() -> (GameSession, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = SaveConfig {
            save_dir: dir.path().to_path_buf(),
            ghost_chance: 0,
            ..SaveConfig::default()
        };
        let mut sess = GameSession::new(config);
        sess.you.name = "Tester".to_string();
        (sess, dir)
    }

    fn start_game(sess: &mut GameSession) {
        let created =
            enter_level(sess, Feature::StoneStairsDownI, LoadMode::StartGame, None).unwrap();
        assert!(created);
    }

    fn descend(sess: &mut GameSession) -> bool {
        let old = sess.you.level_id();
        sess.you.depth += 1;
        enter_level(sess, Feature::StoneStairsDownI, LoadMode::EnterLevel, Some(old)).unwrap()
    }

    fn ascend(sess: &mut GameSession) -> bool {
        let old = sess.you.level_id();
        sess.you.depth -= 1;
        sess.you.char_direction = Direction::Ascending;
        enter_level(sess, Feature::StoneStairsUpI, LoadMode::EnterLevel, Some(old)).unwrap()
    }

    #[test]
    fn test_leave_and_return_restores_level_exactly() {
        let (mut sess, _dir) = make_test_session();
        start_game(&mut sess);

        let mark = Coord::new(10, 10);
        sess.env.set(mark, Feature::StoneArch);
        sess.env.items.push(Item::floor(ItemKind::Gold, mark));

        assert!(descend(&mut sess));
        assert!(!ascend(&mut sess));

        assert_eq!(sess.env.at(mark), Feature::StoneArch);
        assert!(sess
            .env
            .items
            .iter()
            .any(|i| i.kind == ItemKind::Gold && i.pos == Some(mark)));
    }

    #[test]
    fn test_follower_crosses_with_its_inventory() {
        let (mut sess, _dir) = make_test_session();
        start_game(&mut sess);

        sess.env.items.push(Item::held(ItemKind::Weapon));
        let mut pet = Monster::new(
            MonsterKind::Jackal,
            Coord::new(sess.you.pos.x + 1, sess.you.pos.y),
            8,
        );
        pet.flags = MonsterFlags::FRIENDLY | MonsterFlags::TAKING_STAIRS;
        pet.items.push((sess.env.items.len() - 1) as u16);
        sess.env.monsters.push(pet);

        descend(&mut sess);

        let pet = sess
            .env
            .monsters
            .iter()
            .find(|m| m.kind == MonsterKind::Jackal)
            .expect("follower should arrive on the new level");
        assert_eq!(pet.items.len(), 1);
        let carried = &sess.env.items[pet.items[0] as usize];
        assert_eq!(carried.kind, ItemKind::Weapon);
        assert_eq!(carried.pos, None);
    }

    #[test]
    fn test_untagged_monster_stays_behind() {
        let (mut sess, _dir) = make_test_session();
        start_game(&mut sess);

        let mut bystander = Monster::new(
            MonsterKind::Ogre,
            Coord::new(sess.you.pos.x + 1, sess.you.pos.y + 1),
            30,
        );
        bystander.flags = MonsterFlags::FRIENDLY;
        sess.env.monsters.push(bystander);

        descend(&mut sess);
        assert!(!sess.env.monsters.iter().any(|m| m.kind == MonsterKind::Ogre));

        ascend(&mut sess);
        assert!(sess.env.monsters.iter().any(|m| m.kind == MonsterKind::Ogre));
    }

    #[test]
    fn test_wounded_ghost_fades_regardless_of_disposition() {
        let (mut sess, _dir) = make_test_session();
        start_game(&mut sess);

        // Hostile and untagged, next to the player, badly hurt.
        let spot = Coord::new(sess.you.pos.x + 1, sess.you.pos.y);
        let mut ghost = Monster::new(MonsterKind::PlayerGhost, spot, 20);
        ghost.hp = 4;
        sess.env.monsters.push(ghost);

        // Even a destination that takes no followers fades the ghost.
        sess.you.level_type = LevelType::Labyrinth;
        grab_followers(&mut sess);

        let ghost = sess
            .env
            .monsters
            .iter()
            .find(|m| m.kind == MonsterKind::PlayerGhost)
            .expect("the ghost stays on its level");
        assert_ne!(ghost.pos, spot);
        assert!(!ghost.flags.contains(MonsterFlags::TAKING_STAIRS));

        // A healthy one tagged for the stairs still follows normally.
        sess.you.level_type = LevelType::Dungeon;
        let mut keen = Monster::new(
            MonsterKind::PlayerGhost,
            Coord::new(sess.you.pos.x, sess.you.pos.y + 1),
            20,
        );
        keen.flags = MonsterFlags::FRIENDLY | MonsterFlags::TAKING_STAIRS;
        sess.env.monsters.push(keen);
        grab_followers(&mut sess);
        assert!(sess
            .followers
            .get(&sess.you.level_id())
            .map_or(false, |f| !f.is_empty()));
    }

    #[test]
    fn test_arrival_lands_on_paired_stair() {
        let (mut sess, _dir) = make_test_session();
        start_game(&mut sess);

        let old = sess.you.level_id();
        sess.you.depth += 1;
        enter_level(
            &mut sess,
            Feature::StoneStairsDownII,
            LoadMode::EnterLevel,
            Some(old),
        )
        .unwrap();

        assert_eq!(sess.env.at(sess.you.pos), Feature::StoneStairsUpII);
    }

    #[test]
    fn test_monster_on_arrival_stair_is_displaced() {
        let (mut sess, _dir) = make_test_session();
        start_game(&mut sess);

        descend(&mut sess);
        let stair = sess.you.pos;
        sess.env
            .monsters
            .push(Monster::new(MonsterKind::Hobgoblin, stair, 6));
        ascend(&mut sess);

        sess.you.char_direction = Direction::Descending;
        descend(&mut sess);

        assert_eq!(sess.you.pos, stair);
        let squatter = sess
            .env
            .monsters
            .iter()
            .find(|m| m.kind == MonsterKind::Hobgoblin)
            .expect("displaced monster should survive");
        assert_ne!(squatter.pos, stair);
    }

    #[test]
    fn test_ascending_seals_portals() {
        let (mut sess, _dir) = make_test_session();
        start_game(&mut sess);

        let gate = Coord::new(20, 20);
        sess.env.set(gate, Feature::EnterAbyss);
        sess.env.markers.push(Marker {
            pos: gate,
            auto_activate: false,
            activated: false,
            note: "abyssal gate".to_string(),
        });

        descend(&mut sess);
        ascend(&mut sess);

        assert_eq!(sess.env.at(gate), Feature::StoneArch);
        assert!(sess.env.markers.is_empty());
    }

    #[test]
    fn test_descending_leaves_portals_open() {
        let (mut sess, _dir) = make_test_session();
        start_game(&mut sess);

        descend(&mut sess);
        let gate = Coord::new(20, 20);
        sess.env.set(gate, Feature::EnterAbyss);
        ascend(&mut sess);

        sess.you.char_direction = Direction::Descending;
        descend(&mut sess);
        assert_eq!(sess.env.at(gate), Feature::EnterAbyss);
    }

    #[test]
    fn test_leaving_collapsing_level_records_lost_items() {
        let (mut sess, _dir) = make_test_session();
        start_game(&mut sess);

        // Fake having been in a labyrinth with loot on the floor.
        sess.env
            .items
            .push(Item::floor(ItemKind::Weapon, Coord::new(5, 5)));
        sess.env
            .items
            .push(Item::floor(ItemKind::Gold, Coord::new(6, 5)));
        let old = LevelId {
            branch: sess.you.branch,
            depth: sess.you.depth,
            level_type: LevelType::Labyrinth,
        };
        sess.you.depth += 1;
        enter_level(&mut sess, Feature::EscapeHatchDown, LoadMode::EnterLevel, Some(old)).unwrap();

        assert_eq!(sess.you.items_lost, 2);
    }

    #[test]
    fn test_returning_fast_forwards_corpse_rot() {
        let (mut sess, _dir) = make_test_session();
        start_game(&mut sess);

        let mut corpse = Item::floor(ItemKind::Corpse, Coord::new(8, 8));
        corpse.age = 50;
        sess.env.items.push(corpse);

        sess.you.elapsed_time = 100;
        descend(&mut sess);
        sess.you.elapsed_time += 500;
        ascend(&mut sess);

        assert!(!sess.env.items.iter().any(|i| i.kind == ItemKind::Corpse));
    }

    #[test]
    fn test_arrival_cost_uses_species_override() {
        let (mut sess, _dir) = make_test_session();
        start_game(&mut sess);
        sess.you.species = Species::Centaur;

        descend(&mut sess);
        // New level, so the flat override is halved.
        assert_eq!(sess.you.time_taken, sess.config.clumsy_stair_cost / 2);
    }

    #[test]
    fn test_visit_stats_update_and_stay_valid() {
        let (mut sess, _dir) = make_test_session();
        start_game(&mut sess);

        assert_eq!(sess.you.global_info.num_visits, 1);
        assert_eq!(sess.you.global_info.levels_seen, 1);

        descend(&mut sess);
        // Same branch: a new level seen but not a new place visited.
        assert_eq!(sess.you.global_info.num_visits, 1);
        assert_eq!(sess.you.global_info.levels_seen, 2);
        sess.you.global_info.assert_validity();
    }

    #[test]
    fn test_markers_auto_activate_on_entry() {
        let (mut sess, _dir) = make_test_session();
        start_game(&mut sess);

        sess.env.markers.push(Marker {
            pos: Coord::new(12, 12),
            auto_activate: true,
            activated: false,
            note: "altar".to_string(),
        });
        sess.env.markers.push(Marker {
            pos: Coord::new(13, 12),
            auto_activate: false,
            activated: false,
            note: "manual".to_string(),
        });

        descend(&mut sess);
        ascend(&mut sess);

        let altar = sess.env.markers.iter().find(|m| m.note == "altar").unwrap();
        let manual = sess.env.markers.iter().find(|m| m.note == "manual").unwrap();
        assert!(altar.activated);
        assert!(!manual.activated);
    }

    #[test]
    fn test_stale_level_listeners_do_not_fire() {
        use std::sync::{Arc, Mutex};
        let (mut sess, _dir) = make_test_session();
        start_game(&mut sess);

        let log = Arc::new(Mutex::new(Vec::new()));
        let log2 = Arc::clone(&log);
        sess.events.subscribe(move |e| log2.lock().unwrap().push(e));

        // Listeners registered now are for the CURRENT level and must be
        // dropped before the next level's events fire.
        descend(&mut sess);
        assert!(log.lock().unwrap().is_empty());
    }
}
